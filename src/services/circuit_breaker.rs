//! Circuit breaker registry for pipeline node execution.
//!
//! Tracks consecutive failures per node type across runs. When a type
//! reaches its failure threshold the circuit opens and every attempt
//! fails immediately until the reset window elapses; the first attempt
//! after the window runs as a half-open probe.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit rejects attempts.
    pub reset_after: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_after: Duration::seconds(60),
        }
    }
}

/// State of one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected.
    Open,
    /// Probing recovery with a single trial request.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    open_count: u32,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            open_count: 0,
        }
    }

    fn allows(&mut self, config: &BreakerConfig, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match self.opened_at {
                Some(opened) if now >= opened + config.reset_after => {
                    self.state = CircuitState::HalfOpen;
                    true
                }
                _ => false,
            },
        }
    }

    fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    fn record_failure(&mut self, config: &BreakerConfig, now: DateTime<Utc>) {
        self.consecutive_failures += 1;
        // Any half-open failure reopens immediately.
        if self.state == CircuitState::HalfOpen
            || self.consecutive_failures >= config.failure_threshold
        {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
            self.open_count += 1;
        }
    }
}

/// Snapshot of one circuit for observability.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub open_count: u32,
}

/// Keyed registry of circuits.
pub struct BreakerRegistry {
    config: BreakerConfig,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an attempt may proceed for `key` right now.
    pub async fn allows(&self, key: &str) -> bool {
        self.allows_at(key, Utc::now()).await
    }

    /// Clock-injected variant for tests.
    pub async fn allows_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut circuits = self.circuits.lock().await;
        circuits
            .entry(key.to_string())
            .or_insert_with(Circuit::new)
            .allows(&self.config, now)
    }

    pub async fn record_success(&self, key: &str) {
        let mut circuits = self.circuits.lock().await;
        circuits
            .entry(key.to_string())
            .or_insert_with(Circuit::new)
            .record_success();
    }

    pub async fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Utc::now()).await;
    }

    pub async fn record_failure_at(&self, key: &str, now: DateTime<Utc>) {
        let mut circuits = self.circuits.lock().await;
        circuits
            .entry(key.to_string())
            .or_insert_with(Circuit::new)
            .record_failure(&self.config, now);
    }

    /// Manually close a circuit and forget its failure history.
    pub async fn reset(&self, key: &str) {
        let mut circuits = self.circuits.lock().await;
        circuits.remove(key);
    }

    pub async fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let circuits = self.circuits.lock().await;
        circuits
            .iter()
            .map(|(key, c)| CircuitSnapshot {
                key: key.clone(),
                state: c.state,
                consecutive_failures: c.consecutive_failures,
                open_count: c.open_count,
            })
            .collect()
    }
}
