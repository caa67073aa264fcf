//! Domain models.

pub mod agent;
pub mod circle;
pub mod config;
pub mod event;
pub mod memory;
pub mod pipeline;
pub mod schedule;
pub mod task;

pub use agent::{Agent, AgentMetrics, ModelRef};
pub use circle::{Circle, CircleMember, CircleStatus};
pub use config::Config;
pub use event::{Event, EventFilter, EventType};
pub use memory::{cosine_similarity, Memory, MemoryScope, MemoryType, ScoredMemory};
pub use pipeline::{
    BranchLabel, Edge, Node, NodeKind, NodeState, Pipeline, PipelineCounters, PipelineRun,
    PipelineStatus, RunStatus,
};
pub use schedule::{
    ScheduleSpec, ScheduleStatus, ScheduledAction, ScheduledRun, TriggeredBy,
    MIN_INTERVAL_SECONDS,
};
pub use task::{BackgroundTask, StepAction, TaskMetrics, TaskOptions, TaskStatus, TaskStep};
