//! SQLite connection management.
//!
//! WAL-mode pool plus an embedded, idempotent schema script applied at
//! startup. The schema is small enough that migration tooling would be
//! more machinery than value.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::domain::error::StoreError;

/// Idempotent schema, applied on every boot.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    role            TEXT NOT NULL,
    persona         TEXT NOT NULL DEFAULT '',
    traits          TEXT NOT NULL DEFAULT '[]',
    specializations TEXT NOT NULL DEFAULT '[]',
    language        TEXT NOT NULL DEFAULT 'en',
    model_provider  TEXT NOT NULL,
    model_name      TEXT NOT NULL,
    active          INTEGER NOT NULL DEFAULT 1,
    tasks_completed INTEGER NOT NULL DEFAULT 0,
    avg_quality     REAL NOT NULL DEFAULT 0,
    approval_rate   REAL NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS circles (
    id             TEXT PRIMARY KEY,
    name           TEXT NOT NULL UNIQUE,
    status         TEXT NOT NULL DEFAULT 'stopped',
    auto_route     INTEGER NOT NULL DEFAULT 0,
    require_review INTEGER NOT NULL DEFAULT 0,
    project_id     TEXT,
    members        TEXT NOT NULL DEFAULT '[]',
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS background_tasks (
    id                  TEXT PRIMARY KEY,
    goal                TEXT NOT NULL,
    agent_id            TEXT NOT NULL,
    circle_id           TEXT,
    status              TEXT NOT NULL DEFAULT 'pending',
    max_steps           INTEGER NOT NULL,
    timeout_seconds     INTEGER NOT NULL,
    checkpoint_interval INTEGER NOT NULL,
    current_step        INTEGER NOT NULL DEFAULT 0,
    progress_percent    REAL NOT NULL DEFAULT 0,
    progress_summary    TEXT NOT NULL DEFAULT '',
    checkpoint          TEXT,
    final_result        TEXT,
    error_message       TEXT,
    llm_calls           INTEGER NOT NULL DEFAULT 0,
    tokens_used         INTEGER NOT NULL DEFAULT 0,
    tool_calls          INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    started_at          TEXT,
    finished_at         TEXT,
    updated_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_background_tasks_status ON background_tasks(status);

CREATE TABLE IF NOT EXISTS task_steps (
    id          TEXT PRIMARY KEY,
    task_id     TEXT NOT NULL REFERENCES background_tasks(id),
    step_number INTEGER NOT NULL,
    action      TEXT NOT NULL,
    input       TEXT NOT NULL DEFAULT '',
    output      TEXT NOT NULL DEFAULT '',
    tool_name   TEXT,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    UNIQUE(task_id, step_number)
);

CREATE TABLE IF NOT EXISTS scheduled_actions (
    id                   TEXT PRIMARY KEY,
    agent_id             TEXT NOT NULL,
    name                 TEXT NOT NULL UNIQUE,
    goal                 TEXT NOT NULL,
    spec                 TEXT NOT NULL,
    status               TEXT NOT NULL DEFAULT 'active',
    start_date           TEXT,
    end_date             TEXT,
    max_executions       INTEGER,
    execution_count      INTEGER NOT NULL DEFAULT 0,
    retry_on_failure     INTEGER NOT NULL DEFAULT 0,
    max_retries          INTEGER NOT NULL DEFAULT 3,
    retry_count          INTEGER NOT NULL DEFAULT 0,
    allow_concurrent     INTEGER NOT NULL DEFAULT 0,
    task_max_steps       INTEGER,
    task_timeout_seconds INTEGER,
    last_run_at          TEXT,
    next_run_at          TEXT,
    tags                 TEXT NOT NULL DEFAULT '[]',
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scheduled_actions_due
    ON scheduled_actions(status, next_run_at);

CREATE TABLE IF NOT EXISTS scheduled_runs (
    id              TEXT PRIMARY KEY,
    action_id       TEXT NOT NULL REFERENCES scheduled_actions(id),
    run_number      INTEGER NOT NULL,
    task_id         TEXT NOT NULL,
    triggered_at    TEXT NOT NULL,
    triggered_by    TEXT NOT NULL,
    terminal_status TEXT,
    duration_ms     INTEGER,
    finished_at     TEXT
);
CREATE INDEX IF NOT EXISTS idx_scheduled_runs_action ON scheduled_runs(action_id);
CREATE INDEX IF NOT EXISTS idx_scheduled_runs_task ON scheduled_runs(task_id);

CREATE TABLE IF NOT EXISTS pipelines (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'draft',
    nodes           TEXT NOT NULL,
    edges           TEXT NOT NULL,
    timeout_seconds INTEGER NOT NULL DEFAULT 3600,
    total_runs      INTEGER NOT NULL DEFAULT 0,
    successful_runs INTEGER NOT NULL DEFAULT 0,
    avg_duration_ms REAL NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    id              TEXT PRIMARY KEY,
    pipeline_id     TEXT NOT NULL REFERENCES pipelines(id),
    status          TEXT NOT NULL DEFAULT 'pending',
    node_states     TEXT NOT NULL,
    context         TEXT NOT NULL DEFAULT '{}',
    trigger_payload TEXT NOT NULL DEFAULT 'null',
    error           TEXT,
    started_at      TEXT,
    finished_at     TEXT,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pipeline_runs_pipeline ON pipeline_runs(pipeline_id);

CREATE TABLE IF NOT EXISTS memories (
    id           TEXT PRIMARY KEY,
    agent_id     TEXT NOT NULL,
    scope        TEXT NOT NULL,
    scope_id     TEXT,
    content      TEXT NOT NULL,
    embedding    TEXT NOT NULL DEFAULT '[]',
    importance   REAL NOT NULL DEFAULT 0.5,
    access_count INTEGER NOT NULL DEFAULT 0,
    tags         TEXT NOT NULL DEFAULT '[]',
    memory_type  TEXT NOT NULL,
    forgotten    INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories(agent_id, forgotten);
"#;

/// Pooled SQLite handle.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Open (creating if missing) with WAL and foreign keys on.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Apply the embedded schema.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
