//! Circle lifecycle service.
//!
//! Circles are persisted rows; the live handle is reconstructed from the
//! store on demand, so this service is stateless beyond its
//! dependencies. Membership edits and status changes go through here so
//! the matching events fire and cached circle context stays fresh.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::{Circle, CircleMember, CircleStatus, Event, EventType};
use crate::domain::ports::Store;
use crate::services::cache::Cache;
use crate::services::event_bus::EventBus;

pub struct CircleService {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    cache: Arc<Cache>,
}

impl CircleService {
    pub fn new(store: Arc<dyn Store>, bus: Arc<EventBus>, cache: Arc<Cache>) -> Self {
        Self { store, bus, cache }
    }

    /// Create an empty circle. Names are unique per deployment.
    pub async fn create(&self, circle: Circle) -> DomainResult<Uuid> {
        let id = circle.id;
        self.store.upsert_circle(&circle).await?;
        let mut event = Event::new(
            EventType::CircleCreated,
            json!({
                "circle_id": id.to_string(),
                "name": circle.name,
            }),
        )
        .with_circle(id);
        if let Some(project) = circle.project_id {
            event = event.with_project(project);
        }
        self.bus.publish(event).await;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Option<Circle>> {
        Ok(self.store.get_circle(id).await?)
    }

    /// Add a member; idempotent per agent.
    pub async fn add_member(&self, circle_id: Uuid, member: CircleMember) -> DomainResult<()> {
        let mut circle = self.load(circle_id).await?;
        let agent_id = member.agent_id;
        if !circle.add_member(member) {
            return Ok(());
        }
        self.store.upsert_circle(&circle).await?;
        self.cache.invalidate_circle_context(circle_id).await;
        self.bus
            .publish(
                Event::new(
                    EventType::CircleMemberAdded,
                    json!({
                        "circle_id": circle_id.to_string(),
                        "agent_id": agent_id.to_string(),
                        "member_count": circle.members.len(),
                    }),
                )
                .with_agent(agent_id)
                .with_circle(circle_id),
            )
            .await;
        Ok(())
    }

    /// Remove a member. Removing the last member of a non-stopped circle
    /// forces it to stopped.
    pub async fn remove_member(&self, circle_id: Uuid, agent_id: Uuid) -> DomainResult<()> {
        let mut circle = self.load(circle_id).await?;
        if !circle.remove_member(agent_id) {
            return Ok(());
        }
        self.store.upsert_circle(&circle).await?;
        self.cache.invalidate_circle_context(circle_id).await;
        Ok(())
    }

    /// Start a circle: starting -> running.
    pub async fn start(&self, circle_id: Uuid) -> DomainResult<()> {
        let circle = self.load(circle_id).await?;
        if circle.members.is_empty() {
            return Err(crate::domain::OrchestratorError::Precondition(format!(
                "circle '{}' has no members",
                circle.name
            )));
        }
        self.store
            .update_circle_status(circle_id, CircleStatus::Starting)
            .await?;
        self.store
            .update_circle_status(circle_id, CircleStatus::Running)
            .await?;
        Ok(())
    }

    /// Stop a circle: stopping -> stopped.
    pub async fn stop(&self, circle_id: Uuid) -> DomainResult<()> {
        self.load(circle_id).await?;
        self.store
            .update_circle_status(circle_id, CircleStatus::Stopping)
            .await?;
        self.store
            .update_circle_status(circle_id, CircleStatus::Stopped)
            .await?;
        self.cache.invalidate_circle_context(circle_id).await;
        Ok(())
    }

    async fn load(&self, circle_id: Uuid) -> DomainResult<Circle> {
        self.store.get_circle(circle_id).await?.ok_or_else(|| {
            crate::domain::OrchestratorError::Validation(format!("unknown circle {circle_id}"))
        })
    }
}
