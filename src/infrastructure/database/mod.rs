//! SQLite persistence: connection management and one repository module
//! per aggregate, all implemented on a single `SqliteStore` handle.

pub mod connection;
mod util;

mod agent_repo;
mod circle_repo;
mod memory_repo;
mod pipeline_repo;
mod schedule_repo;
mod task_repo;

use sqlx::SqlitePool;

pub use connection::DatabaseConnection;

/// The durable Store implementation. Trait impls live in the per-
/// aggregate repository modules.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
