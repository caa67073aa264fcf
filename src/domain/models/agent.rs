//! Agent domain model.
//!
//! An agent is a persistent worker identity: a persona bound to a model
//! reference. Live execution state never lives here; traversal is always
//! id -> store lookup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to the LLM backing an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    /// Provider key, e.g. "anthropic".
    pub provider: String,
    /// Provider-side model alias.
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Aggregate quality metrics, updated on task terminal states.
///
/// Stored for reporting only; routing does not consume these.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    /// Rolling mean quality score in [0, 1].
    pub avg_quality: f64,
    /// Fraction of reviewed outputs approved, in [0, 1].
    pub approval_rate: f64,
}

impl AgentMetrics {
    /// Fold one completed task into the rolling averages.
    pub fn record_completion(&mut self, quality: Option<f64>) {
        let n = self.tasks_completed as f64;
        if let Some(q) = quality {
            self.avg_quality = (self.avg_quality * n + q.clamp(0.0, 1.0)) / (n + 1.0);
        }
        self.tasks_completed += 1;
    }
}

/// A persistent worker identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    /// Functional role, e.g. "researcher", "reviewer".
    pub role: String,
    /// Persona text injected into Worker context.
    pub persona: String,
    /// Ordered personality traits.
    pub traits: Vec<String>,
    pub specializations: Vec<String>,
    /// BCP 47 language tag for generated output.
    pub language: String,
    pub model: ModelRef,
    /// Deactivation is soft; inactive agents keep their history.
    pub active: bool,
    pub metrics: AgentMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>, role: impl Into<String>, model: ModelRef) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role: role.into(),
            persona: String::new(),
            traits: Vec::new(),
            specializations: Vec::new(),
            language: "en".to_string(),
            model,
            active: true,
            metrics: AgentMetrics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_traits(mut self, traits: Vec<String>) -> Self {
        self.traits = traits;
        self
    }

    pub fn with_specializations(mut self, specs: Vec<String>) -> Self {
        self.specializations = specs;
        self
    }

    /// Soft-deactivate.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.updated_at = Utc::now();
    }
}
