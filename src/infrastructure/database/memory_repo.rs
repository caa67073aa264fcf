//! Memory repository over SQLite.
//!
//! Embeddings are stored as JSON float arrays and cosine similarity is
//! evaluated in the repository; an engine with a native vector index can
//! push the ranking down instead.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{cosine_similarity, Memory, MemoryScope, MemoryType, ScoredMemory};
use crate::domain::ports::store::{MemoryQuery, MemoryStore, StoreResult};

use super::util::{fmt_dt, from_json, parse_dt, parse_uuid, parse_uuid_opt, to_json};
use super::SqliteStore;

#[derive(sqlx::FromRow)]
struct MemoryRow {
    id: String,
    agent_id: String,
    scope: String,
    scope_id: Option<String>,
    content: String,
    embedding: String,
    importance: f64,
    access_count: i64,
    tags: String,
    memory_type: String,
    forgotten: i64,
    created_at: String,
    updated_at: String,
}

impl MemoryRow {
    fn into_domain(self) -> StoreResult<Memory> {
        Ok(Memory {
            id: parse_uuid(&self.id)?,
            agent_id: parse_uuid(&self.agent_id)?,
            scope: MemoryScope::from_str(&self.scope)
                .ok_or_else(|| StoreError::Serialization(format!("bad scope '{}'", self.scope)))?,
            scope_id: parse_uuid_opt(&self.scope_id)?,
            content: self.content,
            embedding: from_json(&self.embedding)?,
            importance: self.importance,
            access_count: self.access_count as u64,
            tags: from_json(&self.tags)?,
            memory_type: MemoryType::from_str(&self.memory_type).ok_or_else(|| {
                StoreError::Serialization(format!("bad memory type '{}'", self.memory_type))
            })?,
            forgotten: self.forgotten != 0,
            created_at: parse_dt(&self.created_at)?,
            updated_at: parse_dt(&self.updated_at)?,
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn insert_memory(&self, memory: &Memory) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO memories
             (id, agent_id, scope, scope_id, content, embedding, importance,
              access_count, tags, memory_type, forgotten, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(memory.id.to_string())
        .bind(memory.agent_id.to_string())
        .bind(memory.scope.as_str())
        .bind(memory.scope_id.map(|s| s.to_string()))
        .bind(&memory.content)
        .bind(to_json(&memory.embedding)?)
        .bind(memory.importance)
        .bind(memory.access_count as i64)
        .bind(to_json(&memory.tags)?)
        .bind(memory.memory_type.as_str())
        .bind(memory.forgotten as i64)
        .bind(fmt_dt(memory.created_at))
        .bind(fmt_dt(memory.updated_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_memory(&self, id: Uuid) -> StoreResult<Option<Memory>> {
        let row: Option<MemoryRow> = sqlx::query_as("SELECT * FROM memories WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(MemoryRow::into_domain).transpose()
    }

    async fn search_memories(&self, query: &MemoryQuery) -> StoreResult<Vec<ScoredMemory>> {
        let rows: Vec<MemoryRow> = sqlx::query_as("SELECT * FROM memories WHERE forgotten = 0")
            .fetch_all(self.pool())
            .await?;

        let mut scored: Vec<ScoredMemory> = Vec::new();
        for row in rows {
            let memory = row.into_domain()?;
            if !memory.visible_to(query.agent_id, &query.circles, &query.projects) {
                continue;
            }
            if let Some(t) = query.memory_type {
                if memory.memory_type != t {
                    continue;
                }
            }
            if !query.tags.is_empty() && !query.tags.iter().all(|t| memory.tags.contains(t)) {
                continue;
            }
            let similarity = cosine_similarity(&memory.embedding, &query.embedding);
            if similarity >= query.threshold {
                scored.push(ScoredMemory { memory, similarity });
            }
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.memory
                        .importance
                        .partial_cmp(&a.memory.importance)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        scored.truncate(query.limit);
        Ok(scored)
    }

    async fn mark_forgotten(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE memories SET forgotten = 1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(fmt_dt(Utc::now()))
        .bind(id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn increment_access(&self, ids: &[Uuid]) -> StoreResult<()> {
        for id in ids {
            sqlx::query("UPDATE memories SET access_count = access_count + 1 WHERE id = ?1")
                .bind(id.to_string())
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }
}
