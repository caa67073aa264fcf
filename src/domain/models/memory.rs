//! Memory domain model.
//!
//! A memory is a durable knowledge unit owned by an agent, with a vector
//! embedding for similarity search and a visibility scope that widens who
//! may recall it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::MemoryError;

/// Visibility domain of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    /// Visible only to the owning agent.
    Agent,
    /// Shared with a circle (scope_id = circle id).
    Circle,
    /// Shared with a project (scope_id = project id).
    Project,
    /// Visible to every agent.
    Global,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Circle => "circle",
            Self::Project => "project",
            Self::Global => "global",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "agent" => Some(Self::Agent),
            "circle" => Some(Self::Circle),
            "project" => Some(Self::Project),
            "global" => Some(Self::Global),
            _ => None,
        }
    }

    /// Scopes other than `Agent` and `Global` carry a scope id.
    pub fn requires_scope_id(&self) -> bool {
        matches!(self, Self::Circle | Self::Project)
    }
}

/// Semantic class of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Preference,
    Decision,
    Learning,
    Error,
    Feedback,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Decision => "decision",
            Self::Learning => "learning",
            Self::Error => "error",
            Self::Feedback => "feedback",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fact" => Some(Self::Fact),
            "preference" => Some(Self::Preference),
            "decision" => Some(Self::Decision),
            "learning" => Some(Self::Learning),
            "error" => Some(Self::Error),
            "feedback" => Some(Self::Feedback),
            _ => None,
        }
    }
}

/// A durable knowledge unit with a vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    /// Owning agent; scope widens visibility beyond the owner.
    pub agent_id: Uuid,
    pub scope: MemoryScope,
    pub scope_id: Option<Uuid>,
    pub content: String,
    /// Fixed-dimensional per deployment.
    pub embedding: Vec<f32>,
    /// Relevance weight in [0, 1].
    pub importance: f64,
    pub access_count: u64,
    pub tags: Vec<String>,
    pub memory_type: MemoryType,
    /// Soft delete; forgotten memories never surface in recall.
    pub forgotten: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Create a memory, validating the scope/scope_id invariant and the
    /// importance range.
    pub fn new(
        agent_id: Uuid,
        content: impl Into<String>,
        memory_type: MemoryType,
        scope: MemoryScope,
        scope_id: Option<Uuid>,
        importance: f64,
    ) -> Result<Self, MemoryError> {
        if scope.requires_scope_id() && scope_id.is_none() {
            return Err(MemoryError::MissingScopeId(scope.as_str().to_string()));
        }
        if !(0.0..=1.0).contains(&importance) {
            return Err(MemoryError::InvalidImportance(importance));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            agent_id,
            scope,
            scope_id,
            content: content.into(),
            embedding: Vec::new(),
            importance,
            access_count: 0,
            tags: Vec::new(),
            memory_type,
            forgotten: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Whether this memory is visible to `agent_id` given the circles and
    /// projects it participates in.
    pub fn visible_to(&self, agent_id: Uuid, circles: &[Uuid], projects: &[Uuid]) -> bool {
        if self.forgotten {
            return false;
        }
        match self.scope {
            MemoryScope::Agent => self.agent_id == agent_id,
            MemoryScope::Circle => self.scope_id.is_some_and(|id| circles.contains(&id)),
            MemoryScope::Project => self.scope_id.is_some_and(|id| projects.contains(&id)),
            MemoryScope::Global => true,
        }
    }
}

/// A recall result: memory plus its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub similarity: f32,
}

/// Cosine similarity between two embeddings. Returns 0 for mismatched or
/// zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
