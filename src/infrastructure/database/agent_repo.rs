//! Agent repository over SQLite.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::models::{Agent, AgentMetrics, ModelRef};
use crate::domain::ports::store::{AgentStore, StoreResult};

use super::util::{fmt_dt, from_json, parse_dt, parse_uuid, to_json};
use super::SqliteStore;

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    name: String,
    role: String,
    persona: String,
    traits: String,
    specializations: String,
    language: String,
    model_provider: String,
    model_name: String,
    active: i64,
    tasks_completed: i64,
    avg_quality: f64,
    approval_rate: f64,
    created_at: String,
    updated_at: String,
}

impl AgentRow {
    fn into_domain(self) -> StoreResult<Agent> {
        Ok(Agent {
            id: parse_uuid(&self.id)?,
            name: self.name,
            role: self.role,
            persona: self.persona,
            traits: from_json(&self.traits)?,
            specializations: from_json(&self.specializations)?,
            language: self.language,
            model: ModelRef::new(self.model_provider, self.model_name),
            active: self.active != 0,
            metrics: AgentMetrics {
                tasks_completed: self.tasks_completed as u64,
                avg_quality: self.avg_quality,
                approval_rate: self.approval_rate,
            },
            created_at: parse_dt(&self.created_at)?,
            updated_at: parse_dt(&self.updated_at)?,
        })
    }
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn upsert_agent(&self, agent: &Agent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO agents
             (id, name, role, persona, traits, specializations, language,
              model_provider, model_name, active, tasks_completed, avg_quality,
              approval_rate, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               role = excluded.role,
               persona = excluded.persona,
               traits = excluded.traits,
               specializations = excluded.specializations,
               language = excluded.language,
               model_provider = excluded.model_provider,
               model_name = excluded.model_name,
               active = excluded.active,
               updated_at = excluded.updated_at",
        )
        .bind(agent.id.to_string())
        .bind(&agent.name)
        .bind(&agent.role)
        .bind(&agent.persona)
        .bind(to_json(&agent.traits)?)
        .bind(to_json(&agent.specializations)?)
        .bind(&agent.language)
        .bind(&agent.model.provider)
        .bind(&agent.model.model)
        .bind(agent.active as i64)
        .bind(agent.metrics.tasks_completed as i64)
        .bind(agent.metrics.avg_quality)
        .bind(agent.metrics.approval_rate)
        .bind(fmt_dt(agent.created_at))
        .bind(fmt_dt(agent.updated_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_agent(&self, id: Uuid) -> StoreResult<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(AgentRow::into_domain).transpose()
    }

    async fn list_agents(&self, active_only: bool) -> StoreResult<Vec<Agent>> {
        let rows: Vec<AgentRow> = if active_only {
            sqlx::query_as("SELECT * FROM agents WHERE active = 1 ORDER BY created_at")
                .fetch_all(self.pool())
                .await?
        } else {
            sqlx::query_as("SELECT * FROM agents ORDER BY created_at")
                .fetch_all(self.pool())
                .await?
        };
        rows.into_iter().map(AgentRow::into_domain).collect()
    }

    async fn update_agent_metrics(&self, id: Uuid, metrics: AgentMetrics) -> StoreResult<()> {
        sqlx::query(
            "UPDATE agents SET tasks_completed = ?1, avg_quality = ?2,
             approval_rate = ?3, updated_at = ?4 WHERE id = ?5",
        )
        .bind(metrics.tasks_completed as i64)
        .bind(metrics.avg_quality)
        .bind(metrics.approval_rate)
        .bind(fmt_dt(Utc::now()))
        .bind(id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
