//! Orchestrator configuration model.
//!
//! Every recognized option with its default. Unknown keys are rejected at
//! deserialization time so typos fail loudly instead of silently falling
//! back to defaults.

use serde::{Deserialize, Serialize};

/// Background executor options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently running task loops.
    pub max_concurrent_tasks: usize,
    pub default_max_steps: u32,
    pub default_timeout_seconds: u64,
    pub default_checkpoint_interval: u32,
    /// Per Worker call deadline inside the loop.
    pub worker_call_timeout_seconds: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 16,
            default_max_steps: 50,
            default_timeout_seconds: 3600,
            default_checkpoint_interval: 5,
            worker_call_timeout_seconds: 120,
        }
    }
}

/// Scheduler options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    pub tick_seconds: u64,
    /// Floor for interval schedules; creation below this is rejected.
    pub min_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 1,
            min_interval_seconds: 60,
        }
    }
}

/// Pipeline engine options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub run_default_timeout_seconds: u64,
    pub node_default_max_attempts: u32,
    /// Consecutive failures per node type before the breaker opens.
    pub breaker_failure_threshold: u32,
    /// Seconds an open breaker stays open.
    pub breaker_reset_after_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run_default_timeout_seconds: 3600,
            node_default_max_attempts: 3,
            breaker_failure_threshold: 5,
            breaker_reset_after_seconds: 60,
        }
    }
}

/// Event bus options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct EventBusConfig {
    /// Ring buffer capacity for `history`.
    pub history_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
        }
    }
}

/// Cache TTLs in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub embedding_ttl_seconds: u64,
    pub recall_ttl_seconds: u64,
    pub circle_context_ttl_seconds: u64,
    /// Entry bound for the in-process embedding tier.
    pub embedding_lru_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_ttl_seconds: 24 * 3600,
            recall_ttl_seconds: 300,
            circle_context_ttl_seconds: 600,
            embedding_lru_capacity: 1000,
        }
    }
}

/// WebSocket hub options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct WsConfig {
    pub heartbeat_interval_seconds: u64,
    pub host: String,
    pub port: u16,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 30,
            host: "127.0.0.1".to_string(),
            port: 9310,
        }
    }
}

/// Database options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".coterie/coterie.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Logging options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error.
    pub level: String,
    /// One of json, pretty.
    pub format: String,
    /// Optional log file directory; stderr only when unset.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
    pub event_bus: EventBusConfig,
    pub cache: CacheConfig,
    pub ws: WsConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}
