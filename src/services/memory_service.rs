//! Memory service: remember, recall, knowledge, and context composition.
//!
//! Embeddings go through the cache-fronted Worker; recall assembles the
//! caller's visibility scope (own memories, circle- and project-shared,
//! global) and runs a thresholded cosine search. Unfiltered recalls are
//! cached briefly; any new memory invalidates the owner's cached recalls
//! through the event bus wiring.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::{
    Event, EventType, Memory, MemoryScope, MemoryType, ScoredMemory,
};
use crate::domain::ports::{ContextProvider, MemoryQuery, Store, Worker, WorkerContext};
use crate::services::cache::Cache;
use crate::services::event_bus::EventBus;

/// Default similarity floor for recall.
pub const DEFAULT_RECALL_THRESHOLD: f32 = 0.7;

/// Default number of memories returned by recall.
pub const DEFAULT_RECALL_LIMIT: usize = 5;

/// Arguments to `remember`, beyond the mandatory fields.
#[derive(Debug, Clone, Default)]
pub struct RememberOptions {
    pub scope_id: Option<Uuid>,
    pub importance: Option<f64>,
    pub tags: Vec<String>,
}

/// Arguments to `recall`, beyond agent and query.
#[derive(Debug, Clone)]
pub struct RecallOptions {
    pub limit: usize,
    pub threshold: f32,
    pub memory_type: Option<MemoryType>,
    pub tags: Vec<String>,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RECALL_LIMIT,
            threshold: DEFAULT_RECALL_THRESHOLD,
            memory_type: None,
            tags: Vec::new(),
        }
    }
}

/// Embedding-backed knowledge store wrapper.
pub struct MemoryService {
    store: Arc<dyn Store>,
    worker: Arc<dyn Worker>,
    cache: Arc<Cache>,
    bus: Arc<EventBus>,
}

impl MemoryService {
    pub fn new(
        store: Arc<dyn Store>,
        worker: Arc<dyn Worker>,
        cache: Arc<Cache>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            worker,
            cache,
            bus,
        }
    }

    /// Persist a new memory with its embedding and announce it.
    pub async fn remember(
        &self,
        agent_id: Uuid,
        content: impl Into<String>,
        memory_type: MemoryType,
        scope: MemoryScope,
        options: RememberOptions,
    ) -> DomainResult<Uuid> {
        let content = content.into();
        let embedding = self.embed_cached(&content).await?;

        let memory = Memory::new(
            agent_id,
            content.clone(),
            memory_type,
            scope,
            options.scope_id,
            options.importance.unwrap_or(0.5),
        )?
        .with_embedding(embedding)
        .with_tags(options.tags);

        self.store.insert_memory(&memory).await?;

        let event_type = if scope == MemoryScope::Agent {
            EventType::MemoryCreated
        } else {
            EventType::MemoryShared
        };
        let mut event = Event::new(
            event_type,
            json!({
                "memory_id": memory.id.to_string(),
                "memory_type": memory_type.as_str(),
                "scope": scope.as_str(),
            }),
        )
        .with_agent(agent_id);
        if scope == MemoryScope::Circle {
            if let Some(circle_id) = options.scope_id {
                event = event.with_circle(circle_id);
            }
        }
        if scope == MemoryScope::Project {
            if let Some(project_id) = options.scope_id {
                event = event.with_project(project_id);
            }
        }
        self.bus.publish(event).await;

        // The bus wiring also invalidates, but the direct call keeps the
        // contract independent of subscription setup order.
        self.cache.invalidate_agent(agent_id).await;

        Ok(memory.id)
    }

    /// Similarity search over everything visible to the agent.
    pub async fn recall(
        &self,
        agent_id: Uuid,
        query: &str,
        options: RecallOptions,
    ) -> DomainResult<Vec<ScoredMemory>> {
        let unfiltered = options.memory_type.is_none() && options.tags.is_empty();
        let cache_key = Cache::recall_key(agent_id, query, options.limit, options.threshold);
        if unfiltered {
            if let Some(cached) = self.cache.get_recall(&cache_key).await {
                return Ok(cached);
            }
        }

        let embedding = self.embed_cached(query).await?;
        let (circles, projects) = self.visible_scopes(agent_id).await?;

        let mut search = MemoryQuery::new(agent_id, embedding);
        search.circles = circles;
        search.projects = projects;
        search.threshold = options.threshold;
        search.limit = options.limit;
        search.memory_type = options.memory_type;
        search.tags = options.tags.clone();

        let results = self.store.search_memories(&search).await?;

        let ids: Vec<Uuid> = results.iter().map(|r| r.memory.id).collect();
        if !ids.is_empty() {
            self.store.increment_access(&ids).await?;
        }

        if unfiltered {
            self.cache.set_recall(&cache_key, &results).await;
        }
        Ok(results)
    }

    /// Record a durable learning, shared at the given scope.
    pub async fn add_knowledge(
        &self,
        agent_id: Uuid,
        content: impl Into<String>,
        scope: MemoryScope,
        scope_id: Option<Uuid>,
        tags: Vec<String>,
    ) -> DomainResult<Uuid> {
        self.remember(
            agent_id,
            content,
            MemoryType::Learning,
            scope,
            RememberOptions {
                scope_id,
                importance: Some(0.8),
                tags,
            },
        )
        .await
    }

    /// Recall restricted to learnings.
    pub async fn search_knowledge(
        &self,
        agent_id: Uuid,
        query: &str,
        limit: usize,
    ) -> DomainResult<Vec<ScoredMemory>> {
        self.recall(
            agent_id,
            query,
            RecallOptions {
                limit,
                memory_type: Some(MemoryType::Learning),
                ..Default::default()
            },
        )
        .await
    }

    /// Soft-delete a memory; it never surfaces in recall again.
    pub async fn forget(&self, memory_id: Uuid) -> DomainResult<()> {
        let memory = self.store.get_memory(memory_id).await?;
        self.store.mark_forgotten(memory_id).await?;
        if let Some(memory) = memory {
            self.cache.invalidate_agent(memory.agent_id).await;
        }
        Ok(())
    }

    /// Record both sides of a conversational exchange as memories.
    pub async fn record_exchange(
        &self,
        agent_id: Uuid,
        prompt: &str,
        reply: &str,
    ) -> DomainResult<()> {
        self.remember(
            agent_id,
            format!("Q: {prompt}\nA: {reply}"),
            MemoryType::Fact,
            MemoryScope::Agent,
            RememberOptions {
                importance: Some(0.3),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    async fn embed_cached(&self, text: &str) -> DomainResult<Vec<f32>> {
        if let Some(hit) = self.cache.get_embedding(text).await {
            return Ok(hit);
        }
        let embedding = self.worker.embed(text).await?;
        self.cache.set_embedding(text, embedding.clone()).await;
        Ok(embedding)
    }

    /// Circles the agent belongs to and the projects those circles are
    /// bound to, for scope assembly.
    async fn visible_scopes(&self, agent_id: Uuid) -> DomainResult<(Vec<Uuid>, Vec<Uuid>)> {
        let circles = self.store.circles_for_agent(agent_id).await?;
        let mut projects = Vec::new();
        for circle_id in &circles {
            if let Some(circle) = self.store.get_circle(*circle_id).await? {
                if let Some(project_id) = circle.project_id {
                    if !projects.contains(&project_id) {
                        projects.push(project_id);
                    }
                }
            }
        }
        Ok((circles, projects))
    }
}

#[async_trait]
impl ContextProvider for MemoryService {
    /// Compose the Worker turn context: persona + project summary +
    /// session summary + top-k memories for the goal.
    async fn compose(&self, agent_id: Uuid, goal: &str) -> WorkerContext {
        let persona = match self.store.get_agent(agent_id).await {
            Ok(Some(agent)) => agent.persona,
            _ => String::new(),
        };

        let memories = self
            .recall(agent_id, goal, RecallOptions::default())
            .await
            .map(|results| {
                results
                    .into_iter()
                    .map(|r| r.memory.content)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        WorkerContext {
            persona,
            project_summary: None,
            session_summary: None,
            memories,
        }
    }
}
