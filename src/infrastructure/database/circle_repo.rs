//! Circle repository over SQLite. Members ride in a JSON column.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::models::{Circle, CircleStatus};
use crate::domain::ports::store::{CircleStore, StoreResult};

use super::util::{fmt_dt, from_json, parse_dt, parse_uuid, parse_uuid_opt, to_json};
use super::SqliteStore;
use crate::domain::error::StoreError;

#[derive(sqlx::FromRow)]
struct CircleRow {
    id: String,
    name: String,
    status: String,
    auto_route: i64,
    require_review: i64,
    project_id: Option<String>,
    members: String,
    created_at: String,
    updated_at: String,
}

impl CircleRow {
    fn into_domain(self) -> StoreResult<Circle> {
        Ok(Circle {
            id: parse_uuid(&self.id)?,
            name: self.name,
            status: CircleStatus::from_str(&self.status)
                .ok_or_else(|| StoreError::Serialization(format!("bad status '{}'", self.status)))?,
            auto_route: self.auto_route != 0,
            require_review: self.require_review != 0,
            project_id: parse_uuid_opt(&self.project_id)?,
            members: from_json(&self.members)?,
            created_at: parse_dt(&self.created_at)?,
            updated_at: parse_dt(&self.updated_at)?,
        })
    }
}

#[async_trait]
impl CircleStore for SqliteStore {
    async fn upsert_circle(&self, circle: &Circle) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO circles
             (id, name, status, auto_route, require_review, project_id, members,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               status = excluded.status,
               auto_route = excluded.auto_route,
               require_review = excluded.require_review,
               project_id = excluded.project_id,
               members = excluded.members,
               updated_at = excluded.updated_at",
        )
        .bind(circle.id.to_string())
        .bind(&circle.name)
        .bind(circle.status.as_str())
        .bind(circle.auto_route as i64)
        .bind(circle.require_review as i64)
        .bind(circle.project_id.map(|p| p.to_string()))
        .bind(to_json(&circle.members)?)
        .bind(fmt_dt(circle.created_at))
        .bind(fmt_dt(circle.updated_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_circle(&self, id: Uuid) -> StoreResult<Option<Circle>> {
        let row: Option<CircleRow> = sqlx::query_as("SELECT * FROM circles WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(CircleRow::into_domain).transpose()
    }

    async fn get_circle_by_name(&self, name: &str) -> StoreResult<Option<Circle>> {
        let row: Option<CircleRow> = sqlx::query_as("SELECT * FROM circles WHERE name = ?1")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        row.map(CircleRow::into_domain).transpose()
    }

    async fn list_circles(&self) -> StoreResult<Vec<Circle>> {
        let rows: Vec<CircleRow> = sqlx::query_as("SELECT * FROM circles ORDER BY created_at")
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(CircleRow::into_domain).collect()
    }

    async fn list_active_circles(&self) -> StoreResult<Vec<Circle>> {
        let rows: Vec<CircleRow> =
            sqlx::query_as("SELECT * FROM circles WHERE status = 'running' ORDER BY created_at")
                .fetch_all(self.pool())
                .await?;
        rows.into_iter().map(CircleRow::into_domain).collect()
    }

    async fn update_circle_status(&self, id: Uuid, status: CircleStatus) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE circles SET status = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(status.as_str())
        .bind(fmt_dt(chrono::Utc::now()))
        .bind(id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn circles_for_agent(&self, agent_id: Uuid) -> StoreResult<Vec<Uuid>> {
        // Membership lives in JSON; scan and filter in process. Circle
        // counts are small by design.
        let circles = self.list_circles().await?;
        Ok(circles
            .into_iter()
            .filter(|c| c.members.iter().any(|m| m.agent_id == agent_id))
            .map(|c| c.id)
            .collect())
    }
}
