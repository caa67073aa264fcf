//! Scheduled action and run repository over SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{ScheduleStatus, ScheduledAction, ScheduledRun, TriggeredBy};
use crate::domain::ports::store::{ScheduleStore, StoreResult};

use super::util::{fmt_dt, fmt_dt_opt, from_json, parse_dt, parse_dt_opt, parse_uuid, to_json};
use super::SqliteStore;

#[derive(sqlx::FromRow)]
struct ActionRow {
    id: String,
    agent_id: String,
    name: String,
    goal: String,
    spec: String,
    status: String,
    start_date: Option<String>,
    end_date: Option<String>,
    max_executions: Option<i64>,
    execution_count: i64,
    retry_on_failure: i64,
    max_retries: i64,
    retry_count: i64,
    allow_concurrent: i64,
    task_max_steps: Option<i64>,
    task_timeout_seconds: Option<i64>,
    last_run_at: Option<String>,
    next_run_at: Option<String>,
    tags: String,
    created_at: String,
    updated_at: String,
}

impl ActionRow {
    fn into_domain(self) -> StoreResult<ScheduledAction> {
        Ok(ScheduledAction {
            id: parse_uuid(&self.id)?,
            agent_id: parse_uuid(&self.agent_id)?,
            name: self.name,
            goal: self.goal,
            spec: from_json(&self.spec)?,
            status: ScheduleStatus::from_str(&self.status)
                .ok_or_else(|| StoreError::Serialization(format!("bad status '{}'", self.status)))?,
            start_date: parse_dt_opt(&self.start_date)?,
            end_date: parse_dt_opt(&self.end_date)?,
            max_executions: self.max_executions.map(|m| m as u64),
            execution_count: self.execution_count as u64,
            retry_on_failure: self.retry_on_failure != 0,
            max_retries: self.max_retries as u32,
            retry_count: self.retry_count as u32,
            allow_concurrent: self.allow_concurrent != 0,
            task_max_steps: self.task_max_steps.map(|m| m as u32),
            task_timeout_seconds: self.task_timeout_seconds.map(|t| t as u64),
            last_run_at: parse_dt_opt(&self.last_run_at)?,
            next_run_at: parse_dt_opt(&self.next_run_at)?,
            tags: from_json(&self.tags)?,
            created_at: parse_dt(&self.created_at)?,
            updated_at: parse_dt(&self.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    action_id: String,
    run_number: i64,
    task_id: String,
    triggered_at: String,
    triggered_by: String,
    terminal_status: Option<String>,
    duration_ms: Option<i64>,
    finished_at: Option<String>,
}

impl RunRow {
    fn into_domain(self) -> StoreResult<ScheduledRun> {
        Ok(ScheduledRun {
            id: parse_uuid(&self.id)?,
            action_id: parse_uuid(&self.action_id)?,
            run_number: self.run_number as u64,
            task_id: parse_uuid(&self.task_id)?,
            triggered_at: parse_dt(&self.triggered_at)?,
            triggered_by: TriggeredBy::from_str(&self.triggered_by).ok_or_else(|| {
                StoreError::Serialization(format!("bad trigger '{}'", self.triggered_by))
            })?,
            terminal_status: self.terminal_status,
            duration_ms: self.duration_ms.map(|d| d as u64),
            finished_at: parse_dt_opt(&self.finished_at)?,
        })
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn create_action(&self, action: &ScheduledAction) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO scheduled_actions
             (id, agent_id, name, goal, spec, status, start_date, end_date,
              max_executions, execution_count, retry_on_failure, max_retries,
              retry_count, allow_concurrent, task_max_steps, task_timeout_seconds,
              last_run_at, next_run_at, tags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        )
        .bind(action.id.to_string())
        .bind(action.agent_id.to_string())
        .bind(&action.name)
        .bind(&action.goal)
        .bind(to_json(&action.spec)?)
        .bind(action.status.as_str())
        .bind(fmt_dt_opt(action.start_date))
        .bind(fmt_dt_opt(action.end_date))
        .bind(action.max_executions.map(|m| m as i64))
        .bind(action.execution_count as i64)
        .bind(action.retry_on_failure as i64)
        .bind(action.max_retries as i64)
        .bind(action.retry_count as i64)
        .bind(action.allow_concurrent as i64)
        .bind(action.task_max_steps.map(|m| m as i64))
        .bind(action.task_timeout_seconds.map(|t| t as i64))
        .bind(fmt_dt_opt(action.last_run_at))
        .bind(fmt_dt_opt(action.next_run_at))
        .bind(to_json(&action.tags)?)
        .bind(fmt_dt(action.created_at))
        .bind(fmt_dt(action.updated_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_action(&self, id: Uuid) -> StoreResult<Option<ScheduledAction>> {
        let row: Option<ActionRow> = sqlx::query_as("SELECT * FROM scheduled_actions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(ActionRow::into_domain).transpose()
    }

    async fn update_action(&self, action: &ScheduledAction) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE scheduled_actions SET
               name = ?1, goal = ?2, spec = ?3, status = ?4, start_date = ?5,
               end_date = ?6, max_executions = ?7, execution_count = ?8,
               retry_on_failure = ?9, max_retries = ?10, retry_count = ?11,
               allow_concurrent = ?12, task_max_steps = ?13,
               task_timeout_seconds = ?14, last_run_at = ?15, next_run_at = ?16,
               tags = ?17, updated_at = ?18
             WHERE id = ?19",
        )
        .bind(&action.name)
        .bind(&action.goal)
        .bind(to_json(&action.spec)?)
        .bind(action.status.as_str())
        .bind(fmt_dt_opt(action.start_date))
        .bind(fmt_dt_opt(action.end_date))
        .bind(action.max_executions.map(|m| m as i64))
        .bind(action.execution_count as i64)
        .bind(action.retry_on_failure as i64)
        .bind(action.max_retries as i64)
        .bind(action.retry_count as i64)
        .bind(action.allow_concurrent as i64)
        .bind(action.task_max_steps.map(|m| m as i64))
        .bind(action.task_timeout_seconds.map(|t| t as i64))
        .bind(fmt_dt_opt(action.last_run_at))
        .bind(fmt_dt_opt(action.next_run_at))
        .bind(to_json(&action.tags)?)
        .bind(fmt_dt(action.updated_at))
        .bind(action.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn delete_action(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM scheduled_runs WHERE action_id = ?1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        sqlx::query("DELETE FROM scheduled_actions WHERE id = ?1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn list_actions(&self) -> StoreResult<Vec<ScheduledAction>> {
        let rows: Vec<ActionRow> =
            sqlx::query_as("SELECT * FROM scheduled_actions ORDER BY created_at")
                .fetch_all(self.pool())
                .await?;
        rows.into_iter().map(ActionRow::into_domain).collect()
    }

    async fn list_due_actions(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduledAction>> {
        let rows: Vec<ActionRow> = sqlx::query_as(
            "SELECT * FROM scheduled_actions
             WHERE status = 'active' AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at",
        )
        .bind(fmt_dt(now))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(ActionRow::into_domain).collect()
    }

    async fn list_event_actions(&self) -> StoreResult<Vec<ScheduledAction>> {
        let rows: Vec<ActionRow> = sqlx::query_as(
            "SELECT * FROM scheduled_actions
             WHERE status = 'active' AND json_extract(spec, '$.type') = 'event'",
        )
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(ActionRow::into_domain).collect()
    }

    async fn create_run(&self, run: &ScheduledRun) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO scheduled_runs
             (id, action_id, run_number, task_id, triggered_at, triggered_by,
              terminal_status, duration_ms, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(run.id.to_string())
        .bind(run.action_id.to_string())
        .bind(run.run_number as i64)
        .bind(run.task_id.to_string())
        .bind(fmt_dt(run.triggered_at))
        .bind(run.triggered_by.as_str())
        .bind(&run.terminal_status)
        .bind(run.duration_ms.map(|d| d as i64))
        .bind(fmt_dt_opt(run.finished_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn update_run(&self, run: &ScheduledRun) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE scheduled_runs SET
               terminal_status = ?1, duration_ms = ?2, finished_at = ?3
             WHERE id = ?4",
        )
        .bind(&run.terminal_status)
        .bind(run.duration_ms.map(|d| d as i64))
        .bind(fmt_dt_opt(run.finished_at))
        .bind(run.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn list_runs(&self, action_id: Uuid) -> StoreResult<Vec<ScheduledRun>> {
        let rows: Vec<RunRow> = sqlx::query_as(
            "SELECT * FROM scheduled_runs WHERE action_id = ?1 ORDER BY run_number",
        )
        .bind(action_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(RunRow::into_domain).collect()
    }

    async fn list_open_runs(&self) -> StoreResult<Vec<ScheduledRun>> {
        let rows: Vec<RunRow> =
            sqlx::query_as("SELECT * FROM scheduled_runs WHERE terminal_status IS NULL")
                .fetch_all(self.pool())
                .await?;
        rows.into_iter().map(RunRow::into_domain).collect()
    }

    async fn has_open_run(&self, action_id: Uuid) -> StoreResult<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM scheduled_runs
             WHERE action_id = ?1 AND terminal_status IS NULL",
        )
        .bind(action_id.to_string())
        .fetch_one(self.pool())
        .await?;
        Ok(row.0 > 0)
    }

    async fn find_run_by_task(&self, task_id: Uuid) -> StoreResult<Option<ScheduledRun>> {
        let row: Option<RunRow> =
            sqlx::query_as("SELECT * FROM scheduled_runs WHERE task_id = ?1")
                .bind(task_id.to_string())
                .fetch_optional(self.pool())
                .await?;
        row.map(RunRow::into_domain).transpose()
    }
}
