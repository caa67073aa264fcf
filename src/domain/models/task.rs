//! Background task domain model.
//!
//! A background task is one autonomous goal-directed execution driven by
//! the executor's plan-act-checkpoint loop. Step rows are the immutable
//! audit trail; the checkpoint blob is opaque to everything but the
//! executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::TaskError;

/// Status of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet claimed by an executor loop
    Pending,
    /// Being driven by an executor loop
    Running,
    /// Suspended at an iteration boundary, resumable
    Paused,
    /// Goal reached
    Completed,
    /// Unrecoverable error or step limit exceeded
    Failed,
    /// Explicitly cancelled by an operator
    Cancelled,
    /// Wall-clock budget exceeded
    Timeout,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled, Self::Failed],
            Self::Running => &[
                Self::Paused,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
                Self::Timeout,
            ],
            Self::Paused => &[Self::Running, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Aggregate usage counters for one task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub llm_calls: u64,
    pub tokens_used: u64,
    pub tool_calls: u64,
}

/// One autonomous execution of a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: Uuid,
    pub goal: String,
    pub agent_id: Uuid,
    pub circle_id: Option<Uuid>,
    pub status: TaskStatus,

    // -- Bounds --
    pub max_steps: u32,
    pub timeout_seconds: u64,
    pub checkpoint_interval: u32,

    // -- Progress --
    pub current_step: u32,
    pub progress_percent: f64,
    pub progress_summary: String,
    /// Opaque blob owned by the executor; never inspected elsewhere.
    pub checkpoint: Option<serde_json::Value>,

    pub final_result: Option<String>,
    pub error_message: Option<String>,
    pub metrics: TaskMetrics,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BackgroundTask {
    pub fn new(agent_id: Uuid, goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            agent_id,
            circle_id: None,
            status: TaskStatus::Pending,
            max_steps: 50,
            timeout_seconds: 3600,
            checkpoint_interval: 5,
            current_step: 0,
            progress_percent: 0.0,
            progress_summary: String::new(),
            checkpoint: None,
            final_result: None,
            error_message: None,
            metrics: TaskMetrics::default(),
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    pub fn with_circle(mut self, circle_id: Uuid) -> Self {
        self.circle_id = Some(circle_id);
        self
    }

    pub fn with_bounds(mut self, max_steps: u32, timeout_seconds: u64) -> Self {
        self.max_steps = max_steps;
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: u32) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    /// Guarded status transition. Terminal states are absorbing; invalid
    /// edges are a precondition failure.
    pub fn transition_to(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidStatusTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        let now = Utc::now();
        if next == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Seconds of wall clock since the task first entered running.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        self.started_at
            .map(|s| now.signed_duration_since(s).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Whether a checkpoint is due after finishing `step`.
    pub fn checkpoint_due(&self, step: u32) -> bool {
        step > 0 && step % self.checkpoint_interval == 0
    }
}

/// Action class recorded by a step row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Plan,
    Execute,
    ToolCall,
    Checkpoint,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Execute => "execute",
            Self::ToolCall => "tool_call",
            Self::Checkpoint => "checkpoint",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(Self::Plan),
            "execute" => Some(Self::Execute),
            "tool_call" => Some(Self::ToolCall),
            "checkpoint" => Some(Self::Checkpoint),
            _ => None,
        }
    }
}

/// Immutable audit row for one loop action. `(task_id, step_number)` is
/// unique; step numbers are strictly increasing per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: Uuid,
    pub task_id: Uuid,
    pub step_number: u32,
    pub action: StepAction,
    pub input: String,
    pub output: String,
    pub tool_name: Option<String>,
    pub duration_ms: u64,
    pub tokens_used: u64,
    pub created_at: DateTime<Utc>,
}

impl TaskStep {
    pub fn new(task_id: Uuid, step_number: u32, action: StepAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            step_number,
            action,
            input: String::new(),
            output: String::new(),
            tool_name: None,
            duration_ms: 0,
            tokens_used: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_io(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.input = input.into();
        self.output = output.into();
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_usage(mut self, duration_ms: u64, tokens_used: u64) -> Self {
        self.duration_ms = duration_ms;
        self.tokens_used = tokens_used;
        self
    }
}

/// Creation-time options accepted by the executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    pub max_steps: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub checkpoint_interval: Option<u32>,
    pub circle_id: Option<Uuid>,
    /// Pre-assigned task id, letting callers link rows (e.g. a scheduled
    /// run) before the loop can reach a terminal state.
    pub task_id: Option<Uuid>,
}
