//! Coterie, a multi-agent orchestration substrate.
//!
//! The core turns declarative goals into durable, recoverable,
//! observable execution:
//! - an in-process typed [`services::EventBus`] with filtered
//!   subscriptions and bounded history,
//! - a checkpointing [`services::BackgroundExecutor`] running
//!   plan-act-checkpoint loops with pause/resume/cancel and crash
//!   recovery,
//! - a [`services::Scheduler`] dispatching cron/interval/once/event
//!   actions into background tasks,
//! - a [`services::PipelineEngine`] executing DAGs with per-node retry
//!   and circuit breaking,
//! - a [`services::WsHub`] fanning whitelisted events out to WebSocket
//!   observers, and
//! - a [`services::MemoryService`] over vector search behind a two-tier
//!   [`services::Cache`].
//!
//! LLM providers sit behind the [`domain::ports::Worker`] port and
//! persistence behind [`domain::ports::Store`]; SQLite and in-memory
//! implementations ship in [`infrastructure`].

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use application::App;
pub use domain::models::Config;
