//! Store ports.
//!
//! Typed persistence contracts the orchestration core consumes. Any
//! relational engine with transactions and a vector-capable index can
//! satisfy these; the crate ships a SQLite implementation and an
//! in-memory one for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    Agent, AgentMetrics, BackgroundTask, Circle, CircleStatus, Memory, MemoryType, Pipeline,
    PipelineRun, ScheduledAction, ScheduledRun, ScoredMemory, TaskStatus, TaskStep,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Agent persistence.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn upsert_agent(&self, agent: &Agent) -> StoreResult<()>;
    async fn get_agent(&self, id: Uuid) -> StoreResult<Option<Agent>>;
    async fn list_agents(&self, active_only: bool) -> StoreResult<Vec<Agent>>;
    /// Replace the stored aggregate metrics for an agent.
    async fn update_agent_metrics(&self, id: Uuid, metrics: AgentMetrics) -> StoreResult<()>;
}

/// Circle persistence. Members ride inside the circle row; traversal to
/// agents is by id.
#[async_trait]
pub trait CircleStore: Send + Sync {
    async fn upsert_circle(&self, circle: &Circle) -> StoreResult<()>;
    async fn get_circle(&self, id: Uuid) -> StoreResult<Option<Circle>>;
    async fn get_circle_by_name(&self, name: &str) -> StoreResult<Option<Circle>>;
    async fn list_circles(&self) -> StoreResult<Vec<Circle>>;
    async fn list_active_circles(&self) -> StoreResult<Vec<Circle>>;
    async fn update_circle_status(&self, id: Uuid, status: CircleStatus) -> StoreResult<()>;
    /// Circle ids an agent belongs to; drives memory visibility.
    async fn circles_for_agent(&self, agent_id: Uuid) -> StoreResult<Vec<Uuid>>;
}

/// Background task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &BackgroundTask) -> StoreResult<()>;
    async fn get_task(&self, id: Uuid) -> StoreResult<Option<BackgroundTask>>;
    /// Full-row update; the row is the authoritative state for every
    /// transition, so callers roll back in-memory state if this fails.
    async fn update_task(&self, task: &BackgroundTask) -> StoreResult<()>;
    /// Atomically move a task to running iff its status is in `from`.
    /// The single-writer gate for executor loops; returns false when the
    /// task was already claimed or in another state.
    async fn claim_task(&self, id: Uuid, from: &[TaskStatus]) -> StoreResult<bool>;
    async fn list_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<BackgroundTask>>;
    /// Tasks in running or paused state, for startup recovery.
    async fn list_in_flight_tasks(&self) -> StoreResult<Vec<BackgroundTask>>;
    async fn append_step(&self, step: &TaskStep) -> StoreResult<()>;
    async fn list_steps(&self, task_id: Uuid) -> StoreResult<Vec<TaskStep>>;
    /// Persist progress and the opaque checkpoint blob in one write.
    async fn persist_checkpoint(
        &self,
        task_id: Uuid,
        current_step: u32,
        progress_percent: f64,
        progress_summary: &str,
        checkpoint: &serde_json::Value,
    ) -> StoreResult<()>;
}

/// Scheduled action persistence.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn create_action(&self, action: &ScheduledAction) -> StoreResult<()>;
    async fn get_action(&self, id: Uuid) -> StoreResult<Option<ScheduledAction>>;
    async fn update_action(&self, action: &ScheduledAction) -> StoreResult<()>;
    async fn delete_action(&self, id: Uuid) -> StoreResult<()>;
    async fn list_actions(&self) -> StoreResult<Vec<ScheduledAction>>;
    /// Active actions due at `now`, ascending by next_run_at.
    async fn list_due_actions(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduledAction>>;
    /// Active event-triggered actions.
    async fn list_event_actions(&self) -> StoreResult<Vec<ScheduledAction>>;
    async fn create_run(&self, run: &ScheduledRun) -> StoreResult<()>;
    async fn update_run(&self, run: &ScheduledRun) -> StoreResult<()>;
    async fn list_runs(&self, action_id: Uuid) -> StoreResult<Vec<ScheduledRun>>;
    /// Runs with no terminal status, across all actions.
    async fn list_open_runs(&self) -> StoreResult<Vec<ScheduledRun>>;
    /// Whether any run of this action is still non-terminal.
    async fn has_open_run(&self, action_id: Uuid) -> StoreResult<bool>;
    async fn find_run_by_task(&self, task_id: Uuid) -> StoreResult<Option<ScheduledRun>>;
}

/// Pipeline persistence.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()>;
    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Option<Pipeline>>;
    async fn update_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()>;
    async fn list_pipelines(&self) -> StoreResult<Vec<Pipeline>>;
    async fn create_pipeline_run(&self, run: &PipelineRun) -> StoreResult<()>;
    async fn get_pipeline_run(&self, id: Uuid) -> StoreResult<Option<PipelineRun>>;
    async fn update_pipeline_run(&self, run: &PipelineRun) -> StoreResult<()>;
    async fn list_pipeline_runs(&self, pipeline_id: Uuid) -> StoreResult<Vec<PipelineRun>>;
}

/// Scoped vector search request.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub embedding: Vec<f32>,
    /// The recalling agent; agent-scoped memories match only this owner.
    pub agent_id: Uuid,
    /// Circles visible to the recalling agent.
    pub circles: Vec<Uuid>,
    /// Projects visible to the recalling agent.
    pub projects: Vec<Uuid>,
    /// Minimum cosine similarity.
    pub threshold: f32,
    pub limit: usize,
    pub memory_type: Option<MemoryType>,
    pub tags: Vec<String>,
}

impl MemoryQuery {
    pub fn new(agent_id: Uuid, embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            agent_id,
            circles: Vec::new(),
            projects: Vec::new(),
            threshold: 0.7,
            limit: 5,
            memory_type: None,
            tags: Vec::new(),
        }
    }

    /// True when no type/tag filter narrows the query; only unfiltered
    /// recalls are cached.
    pub fn is_unfiltered(&self) -> bool {
        self.memory_type.is_none() && self.tags.is_empty()
    }
}

/// Memory persistence and vector search.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert_memory(&self, memory: &Memory) -> StoreResult<()>;
    async fn get_memory(&self, id: Uuid) -> StoreResult<Option<Memory>>;
    /// Cosine search over visible, non-forgotten memories, ordered by
    /// similarity descending (importance as tiebreak), limited.
    async fn search_memories(&self, query: &MemoryQuery) -> StoreResult<Vec<ScoredMemory>>;
    /// Soft delete.
    async fn mark_forgotten(&self, id: Uuid) -> StoreResult<()>;
    async fn increment_access(&self, ids: &[Uuid]) -> StoreResult<()>;
}

/// The full persistence surface the core consumes.
pub trait Store:
    AgentStore + CircleStore + TaskStore + ScheduleStore + PipelineStore + MemoryStore
{
}

impl<T> Store for T where
    T: AgentStore + CircleStore + TaskStore + ScheduleStore + PipelineStore + MemoryStore
{
}
