//! Worker port.
//!
//! The Worker abstracts an LLM-backed agent: planning, acting, goal
//! evaluation, chat, and embedding. Concrete implementations live outside
//! the core and retry their own transient provider failures; the
//! orchestrator never retries planning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::domain::error::WorkerError;

/// Output text marker a Worker may emit to declare the goal reached.
pub const COMPLETE_SENTINEL: &str = "[COMPLETE]";

/// Composed context handed to a Worker turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerContext {
    /// Persona text of the acting agent.
    pub persona: String,
    /// Project-level summary, when the task runs inside a project.
    pub project_summary: Option<String>,
    /// Rolling summary of the session so far.
    pub session_summary: Option<String>,
    /// Top-k recalled memory contents, most similar first.
    pub memories: Vec<String>,
}

impl WorkerContext {
    pub fn with_persona(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            ..Self::default()
        }
    }
}

/// One tool invocation made while executing an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub input: String,
    pub output: String,
    pub duration_ms: u64,
}

/// Result of `execute_action`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub output: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub tokens_used: u64,
    /// Set when the action ran but produced a recoverable error; the
    /// executor records it and lets goal evaluation decide.
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    /// Whether the output carries the completion sentinel.
    pub fn has_complete_sentinel(&self) -> bool {
        self.output.contains(COMPLETE_SENTINEL)
    }
}

/// The LLM-backed agent abstraction the orchestration core drives.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Produce the next action for a goal given accumulated context.
    async fn plan(&self, goal: &str, ctx: &WorkerContext) -> Result<String, WorkerError>;

    /// Execute a planned action, possibly invoking tools.
    async fn execute_action(&self, action: &str, goal: &str)
        -> Result<ActionOutcome, WorkerError>;

    /// Judge whether the goal is reached given opaque loop state.
    async fn is_goal_complete(
        &self,
        goal: &str,
        state: &serde_json::Value,
    ) -> Result<bool, WorkerError>;

    /// Free-form chat turn, used by pipeline agent nodes.
    async fn chat(&self, prompt: &str, ctx: &WorkerContext) -> Result<String, WorkerError>;

    /// Embed text into the deployment's fixed-dimensional vector space.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, WorkerError>;
}

/// Source of composed context for Worker turns.
///
/// Implemented by the memory service; the executor and pipeline engine
/// call through this so context assembly stays out of the loop logic.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn compose(&self, agent_id: uuid::Uuid, goal: &str) -> WorkerContext;
}

/// Deterministic scripted Worker used across the test suites.
///
/// Plans echo a fixed template, actions pop from a scripted queue (the
/// last outcome repeats once the queue drains), and embeddings hash the
/// input into a small stable vector.
pub struct ScriptedWorker {
    outcomes: Mutex<VecDeque<ActionOutcome>>,
    fallback: ActionOutcome,
    chat_reply: String,
    /// Artificial latency per plan/execute call, for timing-sensitive tests.
    call_delay: std::time::Duration,
    pub plan_calls: AtomicU64,
    pub execute_calls: AtomicU64,
    pub embed_calls: AtomicU64,
}

impl ScriptedWorker {
    /// Worker whose every action yields `output`.
    pub fn always(output: impl Into<String>) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: ActionOutcome::text(output),
            chat_reply: "ok".to_string(),
            call_delay: std::time::Duration::ZERO,
            plan_calls: AtomicU64::new(0),
            execute_calls: AtomicU64::new(0),
            embed_calls: AtomicU64::new(0),
        }
    }

    /// Worker that replays `outcomes` in order, then repeats the last.
    pub fn scripted(outcomes: Vec<ActionOutcome>) -> Self {
        let fallback = outcomes
            .last()
            .cloned()
            .unwrap_or_else(|| ActionOutcome::text("noop"));
        Self {
            outcomes: Mutex::new(outcomes.into()),
            fallback,
            chat_reply: "ok".to_string(),
            call_delay: std::time::Duration::ZERO,
            plan_calls: AtomicU64::new(0),
            execute_calls: AtomicU64::new(0),
            embed_calls: AtomicU64::new(0),
        }
    }

    pub fn with_chat_reply(mut self, reply: impl Into<String>) -> Self {
        self.chat_reply = reply.into();
        self
    }

    pub fn with_call_delay(mut self, delay: std::time::Duration) -> Self {
        self.call_delay = delay;
        self
    }

    /// Stable pseudo-embedding: 8 dims derived from byte content.
    pub fn embedding_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        for (i, b) in text.bytes().enumerate() {
            v[i % 8] += f32::from(b) / 255.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn plan(&self, goal: &str, _ctx: &WorkerContext) -> Result<String, WorkerError> {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("next action for: {goal}"))
    }

    async fn execute_action(
        &self,
        _action: &str,
        _goal: &str,
    ) -> Result<ActionOutcome, WorkerError> {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut queue = self.outcomes.lock().expect("outcome queue poisoned");
            queue.pop_front().unwrap_or_else(|| self.fallback.clone())
        };
        Ok(outcome)
    }

    async fn is_goal_complete(
        &self,
        _goal: &str,
        _state: &serde_json::Value,
    ) -> Result<bool, WorkerError> {
        // Completion is driven by the sentinel in scripted outputs.
        Ok(false)
    }

    async fn chat(&self, _prompt: &str, _ctx: &WorkerContext) -> Result<String, WorkerError> {
        Ok(self.chat_reply.clone())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, WorkerError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::embedding_for(text))
    }
}
