//! Circle domain model.
//!
//! A circle is a small named team of agents sharing context, optionally
//! bound to an external project. Circles hold membership references only;
//! agents are fetched by id when needed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircleStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl Default for CircleStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

impl CircleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stopped" => Some(Self::Stopped),
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "stopping" => Some(Self::Stopping),
            _ => None,
        }
    }
}

/// Membership entry. Insertion order is preserved and meaningful for
/// facilitated turn-taking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircleMember {
    pub agent_id: Uuid,
    /// What this member is good at, used when auto-routing goals.
    pub competencies: Vec<String>,
    /// Domains this member may review for others.
    pub reviewable_domains: Vec<String>,
    pub joined_at: DateTime<Utc>,
}

impl CircleMember {
    pub fn new(agent_id: Uuid) -> Self {
        Self {
            agent_id,
            competencies: Vec::new(),
            reviewable_domains: Vec::new(),
            joined_at: Utc::now(),
        }
    }

    pub fn with_competencies(mut self, competencies: Vec<String>) -> Self {
        self.competencies = competencies;
        self
    }

    pub fn with_reviewable_domains(mut self, domains: Vec<String>) -> Self {
        self.reviewable_domains = domains;
        self
    }
}

/// A named team of agents over a shared context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circle {
    pub id: Uuid,
    /// Unique across the deployment.
    pub name: String,
    pub status: CircleStatus,
    /// Route incoming goals to members by competency match.
    pub auto_route: bool,
    /// Require a second member to review outputs before completion.
    pub require_review: bool,
    pub project_id: Option<Uuid>,
    pub members: Vec<CircleMember>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Circle {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: CircleStatus::Stopped,
            auto_route: false,
            require_review: false,
            project_id: None,
            members: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_auto_route(mut self, auto_route: bool) -> Self {
        self.auto_route = auto_route;
        self
    }

    pub fn member(&self, agent_id: Uuid) -> Option<&CircleMember> {
        self.members.iter().find(|m| m.agent_id == agent_id)
    }

    /// Add a member, preserving insertion order. Idempotent per agent.
    pub fn add_member(&mut self, member: CircleMember) -> bool {
        if self.member(member.agent_id).is_some() {
            return false;
        }
        self.members.push(member);
        self.updated_at = Utc::now();
        true
    }

    /// Remove a member. Removing the last member of a non-stopped circle
    /// forces status back to stopped.
    pub fn remove_member(&mut self, agent_id: Uuid) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.agent_id != agent_id);
        let removed = self.members.len() != before;
        if removed {
            self.updated_at = Utc::now();
            if self.members.is_empty() && self.status != CircleStatus::Stopped {
                self.status = CircleStatus::Stopped;
            }
        }
        removed
    }
}
