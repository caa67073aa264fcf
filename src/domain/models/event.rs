//! Event envelope and type enumeration.
//!
//! Events are immutable messages carried by the EventBus. The type set is
//! the wire contract shared with WebSocket observers, so every variant has
//! a stable dotted wire name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// All event types the orchestrator publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "agent.started")]
    AgentStarted,
    #[serde(rename = "agent.task.completed")]
    AgentTaskCompleted,
    #[serde(rename = "agent.tool.executed")]
    AgentToolExecuted,
    #[serde(rename = "memory.created")]
    MemoryCreated,
    #[serde(rename = "memory.shared")]
    MemoryShared,
    #[serde(rename = "circle.created")]
    CircleCreated,
    #[serde(rename = "circle.member.added")]
    CircleMemberAdded,
    #[serde(rename = "conversation.message")]
    ConversationMessage,
    #[serde(rename = "system.error")]
    SystemError,
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.started")]
    TaskStarted,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.failed")]
    TaskFailed,
    #[serde(rename = "task.conflict.detected")]
    TaskConflictDetected,
    #[serde(rename = "background_task.created")]
    BackgroundTaskCreated,
    #[serde(rename = "background_task.started")]
    BackgroundTaskStarted,
    #[serde(rename = "background_task.step")]
    BackgroundTaskStep,
    #[serde(rename = "background_task.checkpoint")]
    BackgroundTaskCheckpoint,
    #[serde(rename = "background_task.completed")]
    BackgroundTaskCompleted,
    #[serde(rename = "background_task.failed")]
    BackgroundTaskFailed,
    #[serde(rename = "background_task.cancelled")]
    BackgroundTaskCancelled,
    #[serde(rename = "background_task.paused")]
    BackgroundTaskPaused,
    #[serde(rename = "background_task.resumed")]
    BackgroundTaskResumed,
    #[serde(rename = "scheduled_action.triggered")]
    ScheduledActionTriggered,
    #[serde(rename = "scheduled_action.started")]
    ScheduledActionStarted,
    #[serde(rename = "scheduled_action.completed")]
    ScheduledActionCompleted,
    #[serde(rename = "scheduled_action.failed")]
    ScheduledActionFailed,
    #[serde(rename = "scheduled_action.paused")]
    ScheduledActionPaused,
    #[serde(rename = "scheduled_action.resumed")]
    ScheduledActionResumed,
    #[serde(rename = "scheduled_action.expired")]
    ScheduledActionExpired,
    #[serde(rename = "pipeline.run.started")]
    PipelineRunStarted,
    #[serde(rename = "pipeline.node.started")]
    PipelineNodeStarted,
    #[serde(rename = "pipeline.node.succeeded")]
    PipelineNodeSucceeded,
    #[serde(rename = "pipeline.node.failed")]
    PipelineNodeFailed,
    #[serde(rename = "pipeline.node.skipped")]
    PipelineNodeSkipped,
    #[serde(rename = "pipeline.run.succeeded")]
    PipelineRunSucceeded,
    #[serde(rename = "pipeline.run.failed")]
    PipelineRunFailed,
    #[serde(rename = "pipeline.run.cancelled")]
    PipelineRunCancelled,
    #[serde(rename = "pipeline.run.timeout")]
    PipelineRunTimeout,
}

impl EventType {
    /// Stable dotted wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentStarted => "agent.started",
            Self::AgentTaskCompleted => "agent.task.completed",
            Self::AgentToolExecuted => "agent.tool.executed",
            Self::MemoryCreated => "memory.created",
            Self::MemoryShared => "memory.shared",
            Self::CircleCreated => "circle.created",
            Self::CircleMemberAdded => "circle.member.added",
            Self::ConversationMessage => "conversation.message",
            Self::SystemError => "system.error",
            Self::TaskCreated => "task.created",
            Self::TaskStarted => "task.started",
            Self::TaskCompleted => "task.completed",
            Self::TaskFailed => "task.failed",
            Self::TaskConflictDetected => "task.conflict.detected",
            Self::BackgroundTaskCreated => "background_task.created",
            Self::BackgroundTaskStarted => "background_task.started",
            Self::BackgroundTaskStep => "background_task.step",
            Self::BackgroundTaskCheckpoint => "background_task.checkpoint",
            Self::BackgroundTaskCompleted => "background_task.completed",
            Self::BackgroundTaskFailed => "background_task.failed",
            Self::BackgroundTaskCancelled => "background_task.cancelled",
            Self::BackgroundTaskPaused => "background_task.paused",
            Self::BackgroundTaskResumed => "background_task.resumed",
            Self::ScheduledActionTriggered => "scheduled_action.triggered",
            Self::ScheduledActionStarted => "scheduled_action.started",
            Self::ScheduledActionCompleted => "scheduled_action.completed",
            Self::ScheduledActionFailed => "scheduled_action.failed",
            Self::ScheduledActionPaused => "scheduled_action.paused",
            Self::ScheduledActionResumed => "scheduled_action.resumed",
            Self::ScheduledActionExpired => "scheduled_action.expired",
            Self::PipelineRunStarted => "pipeline.run.started",
            Self::PipelineNodeStarted => "pipeline.node.started",
            Self::PipelineNodeSucceeded => "pipeline.node.succeeded",
            Self::PipelineNodeFailed => "pipeline.node.failed",
            Self::PipelineNodeSkipped => "pipeline.node.skipped",
            Self::PipelineRunSucceeded => "pipeline.run.succeeded",
            Self::PipelineRunFailed => "pipeline.run.failed",
            Self::PipelineRunCancelled => "pipeline.run.cancelled",
            Self::PipelineRunTimeout => "pipeline.run.timeout",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "agent.started" => Some(Self::AgentStarted),
            "agent.task.completed" => Some(Self::AgentTaskCompleted),
            "agent.tool.executed" => Some(Self::AgentToolExecuted),
            "memory.created" => Some(Self::MemoryCreated),
            "memory.shared" => Some(Self::MemoryShared),
            "circle.created" => Some(Self::CircleCreated),
            "circle.member.added" => Some(Self::CircleMemberAdded),
            "conversation.message" => Some(Self::ConversationMessage),
            "system.error" => Some(Self::SystemError),
            "task.created" => Some(Self::TaskCreated),
            "task.started" => Some(Self::TaskStarted),
            "task.completed" => Some(Self::TaskCompleted),
            "task.failed" => Some(Self::TaskFailed),
            "task.conflict.detected" => Some(Self::TaskConflictDetected),
            "background_task.created" => Some(Self::BackgroundTaskCreated),
            "background_task.started" => Some(Self::BackgroundTaskStarted),
            "background_task.step" => Some(Self::BackgroundTaskStep),
            "background_task.checkpoint" => Some(Self::BackgroundTaskCheckpoint),
            "background_task.completed" => Some(Self::BackgroundTaskCompleted),
            "background_task.failed" => Some(Self::BackgroundTaskFailed),
            "background_task.cancelled" => Some(Self::BackgroundTaskCancelled),
            "background_task.paused" => Some(Self::BackgroundTaskPaused),
            "background_task.resumed" => Some(Self::BackgroundTaskResumed),
            "scheduled_action.triggered" => Some(Self::ScheduledActionTriggered),
            "scheduled_action.started" => Some(Self::ScheduledActionStarted),
            "scheduled_action.completed" => Some(Self::ScheduledActionCompleted),
            "scheduled_action.failed" => Some(Self::ScheduledActionFailed),
            "scheduled_action.paused" => Some(Self::ScheduledActionPaused),
            "scheduled_action.resumed" => Some(Self::ScheduledActionResumed),
            "scheduled_action.expired" => Some(Self::ScheduledActionExpired),
            "pipeline.run.started" => Some(Self::PipelineRunStarted),
            "pipeline.node.started" => Some(Self::PipelineNodeStarted),
            "pipeline.node.succeeded" => Some(Self::PipelineNodeSucceeded),
            "pipeline.node.failed" => Some(Self::PipelineNodeFailed),
            "pipeline.node.skipped" => Some(Self::PipelineNodeSkipped),
            "pipeline.run.succeeded" => Some(Self::PipelineRunSucceeded),
            "pipeline.run.failed" => Some(Self::PipelineRunFailed),
            "pipeline.run.cancelled" => Some(Self::PipelineRunCancelled),
            "pipeline.run.timeout" => Some(Self::PipelineRunTimeout),
            _ => None,
        }
    }

    /// Terminal background-task event types. Timeout terminals ride the
    /// failed wire type with `status: "timeout"` in the payload.
    pub const BACKGROUND_TASK_TERMINAL: [EventType; 3] = [
        Self::BackgroundTaskCompleted,
        Self::BackgroundTaskFailed,
        Self::BackgroundTaskCancelled,
    ];
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Free-form payload map.
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_agent_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circle_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
}

impl Event {
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            data,
            source_agent_id: None,
            circle_id: None,
            project_id: None,
        }
    }

    pub fn with_agent(mut self, agent_id: Uuid) -> Self {
        self.source_agent_id = Some(agent_id);
        self
    }

    pub fn with_circle(mut self, circle_id: Uuid) -> Self {
        self.circle_id = Some(circle_id);
        self
    }

    pub fn with_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Read a string field out of the payload map.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Read a UUID field out of the payload map.
    pub fn data_uuid(&self, key: &str) -> Option<Uuid> {
        self.data_str(key).and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Predicate over events used by subscriptions and history queries.
#[derive(Clone, Default)]
pub struct EventFilter {
    pub source_agent_id: Option<Uuid>,
    pub circle_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    /// Custom predicate for advanced filtering.
    pub predicate: Option<Arc<dyn Fn(&Event) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFilter")
            .field("source_agent_id", &self.source_agent_id)
            .field("circle_id", &self.circle_id)
            .field("project_id", &self.project_id)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(mut self, id: Uuid) -> Self {
        self.source_agent_id = Some(id);
        self
    }

    pub fn circle(mut self, id: Uuid) -> Self {
        self.circle_id = Some(id);
        self
    }

    pub fn project(mut self, id: Uuid) -> Self {
        self.project_id = Some(id);
        self
    }

    pub fn predicate(mut self, pred: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(pred));
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(agent) = self.source_agent_id {
            if event.source_agent_id != Some(agent) {
                return false;
            }
        }
        if let Some(circle) = self.circle_id {
            if event.circle_id != Some(circle) {
                return false;
            }
        }
        if let Some(project) = self.project_id {
            if event.project_id != Some(project) {
                return false;
            }
        }
        if let Some(ref pred) = self.predicate {
            if !pred(event) {
                return false;
            }
        }
        true
    }
}
