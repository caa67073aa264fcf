//! Background task and step repository over SQLite.
//!
//! The claim gate is a conditional UPDATE: the row moves to running only
//! when its status is still in the caller's expected set, which makes a
//! single claimer win under concurrent starts.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{BackgroundTask, StepAction, TaskMetrics, TaskStatus, TaskStep};
use crate::domain::ports::store::{StoreResult, TaskStore};

use super::util::{fmt_dt, fmt_dt_opt, parse_dt, parse_dt_opt, parse_uuid, parse_uuid_opt};
use super::SqliteStore;

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    goal: String,
    agent_id: String,
    circle_id: Option<String>,
    status: String,
    max_steps: i64,
    timeout_seconds: i64,
    checkpoint_interval: i64,
    current_step: i64,
    progress_percent: f64,
    progress_summary: String,
    checkpoint: Option<String>,
    final_result: Option<String>,
    error_message: Option<String>,
    llm_calls: i64,
    tokens_used: i64,
    tool_calls: i64,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    updated_at: String,
}

impl TaskRow {
    fn into_domain(self) -> StoreResult<BackgroundTask> {
        let checkpoint = self
            .checkpoint
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(BackgroundTask {
            id: parse_uuid(&self.id)?,
            goal: self.goal,
            agent_id: parse_uuid(&self.agent_id)?,
            circle_id: parse_uuid_opt(&self.circle_id)?,
            status: TaskStatus::from_str(&self.status)
                .ok_or_else(|| StoreError::Serialization(format!("bad status '{}'", self.status)))?,
            max_steps: self.max_steps as u32,
            timeout_seconds: self.timeout_seconds as u64,
            checkpoint_interval: self.checkpoint_interval as u32,
            current_step: self.current_step as u32,
            progress_percent: self.progress_percent,
            progress_summary: self.progress_summary,
            checkpoint,
            final_result: self.final_result,
            error_message: self.error_message,
            metrics: TaskMetrics {
                llm_calls: self.llm_calls as u64,
                tokens_used: self.tokens_used as u64,
                tool_calls: self.tool_calls as u64,
            },
            created_at: parse_dt(&self.created_at)?,
            started_at: parse_dt_opt(&self.started_at)?,
            finished_at: parse_dt_opt(&self.finished_at)?,
            updated_at: parse_dt(&self.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    id: String,
    task_id: String,
    step_number: i64,
    action: String,
    input: String,
    output: String,
    tool_name: Option<String>,
    duration_ms: i64,
    tokens_used: i64,
    created_at: String,
}

impl StepRow {
    fn into_domain(self) -> StoreResult<TaskStep> {
        Ok(TaskStep {
            id: parse_uuid(&self.id)?,
            task_id: parse_uuid(&self.task_id)?,
            step_number: self.step_number as u32,
            action: StepAction::from_str(&self.action)
                .ok_or_else(|| StoreError::Serialization(format!("bad action '{}'", self.action)))?,
            input: self.input,
            output: self.output,
            tool_name: self.tool_name,
            duration_ms: self.duration_ms as u64,
            tokens_used: self.tokens_used as u64,
            created_at: parse_dt(&self.created_at)?,
        })
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(&self, task: &BackgroundTask) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO background_tasks
             (id, goal, agent_id, circle_id, status, max_steps, timeout_seconds,
              checkpoint_interval, current_step, progress_percent, progress_summary,
              checkpoint, final_result, error_message, llm_calls, tokens_used,
              tool_calls, created_at, started_at, finished_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        )
        .bind(task.id.to_string())
        .bind(&task.goal)
        .bind(task.agent_id.to_string())
        .bind(task.circle_id.map(|c| c.to_string()))
        .bind(task.status.as_str())
        .bind(task.max_steps as i64)
        .bind(task.timeout_seconds as i64)
        .bind(task.checkpoint_interval as i64)
        .bind(task.current_step as i64)
        .bind(task.progress_percent)
        .bind(&task.progress_summary)
        .bind(
            task.checkpoint
                .as_ref()
                .map(|c| c.to_string()),
        )
        .bind(&task.final_result)
        .bind(&task.error_message)
        .bind(task.metrics.llm_calls as i64)
        .bind(task.metrics.tokens_used as i64)
        .bind(task.metrics.tool_calls as i64)
        .bind(fmt_dt(task.created_at))
        .bind(fmt_dt_opt(task.started_at))
        .bind(fmt_dt_opt(task.finished_at))
        .bind(fmt_dt(task.updated_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<BackgroundTask>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM background_tasks WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(TaskRow::into_domain).transpose()
    }

    async fn update_task(&self, task: &BackgroundTask) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE background_tasks SET
               status = ?1, current_step = ?2, progress_percent = ?3,
               progress_summary = ?4, checkpoint = ?5, final_result = ?6,
               error_message = ?7, llm_calls = ?8, tokens_used = ?9,
               tool_calls = ?10, started_at = ?11, finished_at = ?12,
               updated_at = ?13
             WHERE id = ?14",
        )
        .bind(task.status.as_str())
        .bind(task.current_step as i64)
        .bind(task.progress_percent)
        .bind(&task.progress_summary)
        .bind(task.checkpoint.as_ref().map(|c| c.to_string()))
        .bind(&task.final_result)
        .bind(&task.error_message)
        .bind(task.metrics.llm_calls as i64)
        .bind(task.metrics.tokens_used as i64)
        .bind(task.metrics.tool_calls as i64)
        .bind(fmt_dt_opt(task.started_at))
        .bind(fmt_dt_opt(task.finished_at))
        .bind(fmt_dt(task.updated_at))
        .bind(task.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn claim_task(&self, id: Uuid, from: &[TaskStatus]) -> StoreResult<bool> {
        // Build the IN list from the fixed status vocabulary; values are
        // bound, never interpolated.
        let placeholders = (0..from.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE background_tasks
             SET status = 'running',
                 started_at = COALESCE(started_at, ?1),
                 updated_at = ?2
             WHERE id = ?3 AND status IN ({placeholders})"
        );
        let now = fmt_dt(Utc::now());
        let mut query = sqlx::query(&sql).bind(&now).bind(&now).bind(id.to_string());
        for status in from {
            query = query.bind(status.as_str());
        }
        let result = query.execute(self.pool()).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<BackgroundTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM background_tasks WHERE status = ?1 ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(TaskRow::into_domain).collect()
    }

    async fn list_in_flight_tasks(&self) -> StoreResult<Vec<BackgroundTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM background_tasks
             WHERE status IN ('running', 'paused') ORDER BY created_at",
        )
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(TaskRow::into_domain).collect()
    }

    async fn append_step(&self, step: &TaskStep) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO task_steps
             (id, task_id, step_number, action, input, output, tool_name,
              duration_ms, tokens_used, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(step.id.to_string())
        .bind(step.task_id.to_string())
        .bind(step.step_number as i64)
        .bind(step.action.as_str())
        .bind(&step.input)
        .bind(&step.output)
        .bind(&step.tool_name)
        .bind(step.duration_ms as i64)
        .bind(step.tokens_used as i64)
        .bind(fmt_dt(step.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn list_steps(&self, task_id: Uuid) -> StoreResult<Vec<TaskStep>> {
        let rows: Vec<StepRow> = sqlx::query_as(
            "SELECT * FROM task_steps WHERE task_id = ?1 ORDER BY step_number",
        )
        .bind(task_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(StepRow::into_domain).collect()
    }

    async fn persist_checkpoint(
        &self,
        task_id: Uuid,
        current_step: u32,
        progress_percent: f64,
        progress_summary: &str,
        checkpoint: &serde_json::Value,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE background_tasks SET
               current_step = ?1, progress_percent = ?2, progress_summary = ?3,
               checkpoint = ?4, updated_at = ?5
             WHERE id = ?6",
        )
        .bind(current_step as i64)
        .bind(progress_percent)
        .bind(progress_summary)
        .bind(checkpoint.to_string())
        .bind(fmt_dt(Utc::now()))
        .bind(task_id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }
}
