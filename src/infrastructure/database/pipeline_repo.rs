//! Pipeline and run repository over SQLite. Graphs and per-run state
//! maps are stored as JSON columns.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{Pipeline, PipelineCounters, PipelineRun, PipelineStatus, RunStatus};
use crate::domain::ports::store::{PipelineStore, StoreResult};

use super::util::{fmt_dt, fmt_dt_opt, from_json, parse_dt, parse_dt_opt, parse_uuid, to_json};
use super::SqliteStore;

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: String,
    name: String,
    status: String,
    nodes: String,
    edges: String,
    timeout_seconds: i64,
    total_runs: i64,
    successful_runs: i64,
    avg_duration_ms: f64,
    created_at: String,
    updated_at: String,
}

impl PipelineRow {
    fn into_domain(self) -> StoreResult<Pipeline> {
        Ok(Pipeline {
            id: parse_uuid(&self.id)?,
            name: self.name,
            status: PipelineStatus::from_str(&self.status)
                .ok_or_else(|| StoreError::Serialization(format!("bad status '{}'", self.status)))?,
            nodes: from_json(&self.nodes)?,
            edges: from_json(&self.edges)?,
            timeout_seconds: self.timeout_seconds as u64,
            counters: PipelineCounters {
                total_runs: self.total_runs as u64,
                successful_runs: self.successful_runs as u64,
                avg_duration_ms: self.avg_duration_ms,
            },
            created_at: parse_dt(&self.created_at)?,
            updated_at: parse_dt(&self.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PipelineRunRow {
    id: String,
    pipeline_id: String,
    status: String,
    node_states: String,
    context: String,
    trigger_payload: String,
    error: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
    created_at: String,
}

impl PipelineRunRow {
    fn into_domain(self) -> StoreResult<PipelineRun> {
        let status = match self.status.as_str() {
            "pending" => RunStatus::Pending,
            "running" => RunStatus::Running,
            "succeeded" => RunStatus::Succeeded,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            "timeout" => RunStatus::Timeout,
            other => {
                return Err(StoreError::Serialization(format!("bad run status '{other}'")))
            }
        };
        Ok(PipelineRun {
            id: parse_uuid(&self.id)?,
            pipeline_id: parse_uuid(&self.pipeline_id)?,
            status,
            node_states: from_json(&self.node_states)?,
            context: from_json(&self.context)?,
            trigger_payload: from_json(&self.trigger_payload)?,
            error: self.error,
            started_at: parse_dt_opt(&self.started_at)?,
            finished_at: parse_dt_opt(&self.finished_at)?,
            created_at: parse_dt(&self.created_at)?,
        })
    }
}

#[async_trait]
impl PipelineStore for SqliteStore {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO pipelines
             (id, name, status, nodes, edges, timeout_seconds, total_runs,
              successful_runs, avg_duration_ms, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(pipeline.id.to_string())
        .bind(&pipeline.name)
        .bind(pipeline.status.as_str())
        .bind(to_json(&pipeline.nodes)?)
        .bind(to_json(&pipeline.edges)?)
        .bind(pipeline.timeout_seconds as i64)
        .bind(pipeline.counters.total_runs as i64)
        .bind(pipeline.counters.successful_runs as i64)
        .bind(pipeline.counters.avg_duration_ms)
        .bind(fmt_dt(pipeline.created_at))
        .bind(fmt_dt(pipeline.updated_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Option<Pipeline>> {
        let row: Option<PipelineRow> = sqlx::query_as("SELECT * FROM pipelines WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(PipelineRow::into_domain).transpose()
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE pipelines SET
               name = ?1, status = ?2, nodes = ?3, edges = ?4, timeout_seconds = ?5,
               total_runs = ?6, successful_runs = ?7, avg_duration_ms = ?8,
               updated_at = ?9
             WHERE id = ?10",
        )
        .bind(&pipeline.name)
        .bind(pipeline.status.as_str())
        .bind(to_json(&pipeline.nodes)?)
        .bind(to_json(&pipeline.edges)?)
        .bind(pipeline.timeout_seconds as i64)
        .bind(pipeline.counters.total_runs as i64)
        .bind(pipeline.counters.successful_runs as i64)
        .bind(pipeline.counters.avg_duration_ms)
        .bind(fmt_dt(pipeline.updated_at))
        .bind(pipeline.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn list_pipelines(&self) -> StoreResult<Vec<Pipeline>> {
        let rows: Vec<PipelineRow> = sqlx::query_as("SELECT * FROM pipelines ORDER BY created_at")
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(PipelineRow::into_domain).collect()
    }

    async fn create_pipeline_run(&self, run: &PipelineRun) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO pipeline_runs
             (id, pipeline_id, status, node_states, context, trigger_payload,
              error, started_at, finished_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(run.id.to_string())
        .bind(run.pipeline_id.to_string())
        .bind(run.status.as_str())
        .bind(to_json(&run.node_states)?)
        .bind(to_json(&run.context)?)
        .bind(run.trigger_payload.to_string())
        .bind(&run.error)
        .bind(fmt_dt_opt(run.started_at))
        .bind(fmt_dt_opt(run.finished_at))
        .bind(fmt_dt(run.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_pipeline_run(&self, id: Uuid) -> StoreResult<Option<PipelineRun>> {
        let row: Option<PipelineRunRow> =
            sqlx::query_as("SELECT * FROM pipeline_runs WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(self.pool())
                .await?;
        row.map(PipelineRunRow::into_domain).transpose()
    }

    async fn update_pipeline_run(&self, run: &PipelineRun) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE pipeline_runs SET
               status = ?1, node_states = ?2, context = ?3, error = ?4,
               started_at = ?5, finished_at = ?6
             WHERE id = ?7",
        )
        .bind(run.status.as_str())
        .bind(to_json(&run.node_states)?)
        .bind(to_json(&run.context)?)
        .bind(&run.error)
        .bind(fmt_dt_opt(run.started_at))
        .bind(fmt_dt_opt(run.finished_at))
        .bind(run.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn list_pipeline_runs(&self, pipeline_id: Uuid) -> StoreResult<Vec<PipelineRun>> {
        let rows: Vec<PipelineRunRow> = sqlx::query_as(
            "SELECT * FROM pipeline_runs WHERE pipeline_id = ?1 ORDER BY created_at",
        )
        .bind(pipeline_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(PipelineRunRow::into_domain).collect()
    }
}
