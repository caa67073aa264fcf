//! Domain error types for the coterie orchestration core.
//!
//! Each error enum maps to one row of the error taxonomy: validation and
//! precondition failures are rejected synchronously, transient errors are
//! retried by their producer, permanent errors surface as terminal state.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by background task operations and the executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Task with the given ID was not found
    #[error("Background task not found: {0}")]
    NotFound(Uuid),

    /// Invalid status transition attempted
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    /// Task is already driven by an executor loop
    #[error("Task {0} is already claimed by a running loop")]
    AlreadyClaimed(Uuid),

    /// The executor's worker pool is full
    #[error("Executor at capacity: {running} of {max} task slots in use")]
    CapacityExhausted { running: usize, max: usize },

    /// A control operation requires a status the task is not in
    #[error("Task {id} is {actual}, expected {expected}")]
    WrongStatus {
        id: Uuid,
        expected: String,
        actual: String,
    },

    /// Numeric bound outside the accepted range
    #[error("Invalid value for {field}: {value}")]
    InvalidBound { field: String, value: i64 },
}

impl TaskError {
    /// True when retrying the same call cannot succeed.
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::InvalidStatusTransition { .. } | Self::InvalidBound { .. } | Self::NotFound(_)
        )
    }
}

/// Errors raised by schedule validation and dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Scheduled action not found: {0}")]
    NotFound(Uuid),

    /// Interval below the enforced minimum
    #[error("Interval of {0}s is below the 60s minimum")]
    IntervalTooShort(u64),

    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// One-shot schedule whose fire time already passed
    #[error("Fire time {0} is in the past")]
    FireTimeInPast(String),

    #[error("Scheduled action {id} is {actual}, expected {expected}")]
    WrongStatus {
        id: Uuid,
        expected: String,
        actual: String,
    },
}

/// Errors raised by pipeline validation and execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Pipeline not found: {0}")]
    NotFound(Uuid),

    #[error("Pipeline run not found: {0}")]
    RunNotFound(Uuid),

    /// The node graph contains a cycle
    #[error("Pipeline graph contains a cycle")]
    CyclicGraph,

    #[error("Pipeline must have exactly one trigger node with no incoming edges, found {0}")]
    BadTriggerCount(usize),

    #[error("Node {0} is not reachable from the trigger")]
    UnreachableNode(String),

    #[error("Condition node {node} must have exactly two outgoing edges labeled true/false")]
    BadConditionEdges { node: String },

    #[error("Parallel node {node} branches must converge on a single join node")]
    BadParallelJoin { node: String },

    #[error("Edge references unknown node: {0}")]
    UnknownNode(String),

    #[error("Unknown action '{0}' in action node config")]
    UnknownAction(String),

    #[error("Node {node} config is invalid: {reason}")]
    BadNodeConfig { node: String, reason: String },

    #[error("Pipeline {0} is not active")]
    NotActive(Uuid),

    #[error("Circuit breaker open for node type '{0}'")]
    BreakerOpen(String),
}

/// Errors raised by the Worker port.
///
/// Workers retry their own transient failures internally; errors that
/// escape the port are classified so callers can decide terminal state.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Provider or transport failure that may succeed on retry
    #[error("Worker call failed: {0}")]
    Transient(String),

    /// Model or contract failure that will not succeed on retry
    #[error("Worker permanent failure: {0}")]
    Permanent(String),

    /// Per-call deadline exceeded
    #[error("Worker call timed out after {0}s")]
    Timeout(u64),
}

impl WorkerError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Errors raised by Store implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Row not found")]
    RowNotFound,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// True when the operation may succeed if retried.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::QueryFailed(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Self::ConnectionFailed(e.to_string()),
            sqlx::Error::Database(ref db) if db.message().contains("UNIQUE") => {
                Self::ConstraintViolation(e.to_string())
            }
            other => Self::QueryFailed(other.to_string()),
        }
    }
}

/// Errors raised by memory operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryError {
    #[error("Memory not found: {0}")]
    NotFound(Uuid),

    /// Non-agent scopes require a scope id
    #[error("Scope '{0}' requires a scope_id")]
    MissingScopeId(String),

    #[error("Importance {0} outside [0, 1]")]
    InvalidImportance(f64),

    #[error("Embedding dimensionality mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Top-level error for API-facing surfaces.
///
/// Carries the taxonomy kind plus enough context for the caller to
/// requery terminal state via `get`.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("precondition: {0}")]
    Precondition(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Convenience alias used across service signatures.
pub type DomainResult<T> = Result<T, OrchestratorError>;
