//! Orchestration core services.

pub mod cache;
pub mod circle_service;
pub mod circuit_breaker;
pub mod event_bus;
pub mod executor;
pub mod memory_service;
pub mod pipeline_engine;
pub mod scheduler;
pub mod ws_hub;

pub use cache::Cache;
pub use circle_service::CircleService;
pub use circuit_breaker::{BreakerConfig, BreakerRegistry, CircuitState};
pub use event_bus::{EventBus, EventHandler, FnHandler, SubscriptionId};
pub use executor::BackgroundExecutor;
pub use memory_service::{MemoryService, RecallOptions, RememberOptions};
pub use pipeline_engine::PipelineEngine;
pub use scheduler::Scheduler;
pub use ws_hub::{WsHub, WsSink};
