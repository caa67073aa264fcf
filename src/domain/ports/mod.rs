//! Ports: contracts between the orchestration core and its collaborators.

pub mod action_registry;
pub mod shared_cache;
pub mod store;
pub mod worker;

pub use action_registry::{ActionHandler, ActionRegistry, FnAction};
pub use shared_cache::{CacheStats, SharedCache};
pub use store::{
    AgentStore, CircleStore, MemoryQuery, MemoryStore, PipelineStore, ScheduleStore, Store,
    StoreResult, TaskStore,
};
pub use worker::{
    ActionOutcome, ContextProvider, ScriptedWorker, ToolInvocation, Worker, WorkerContext,
    COMPLETE_SENTINEL,
};
