//! In-memory Store implementation.
//!
//! Backs the test suites and `config-check`; the SQLite repositories are
//! the durable production path. Semantics mirror the SQL implementation,
//! including the conditional-update claim gate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    cosine_similarity, Agent, AgentMetrics, BackgroundTask, Circle, CircleStatus, Memory, Pipeline,
    PipelineRun, ScheduledAction, ScheduledRun, ScoredMemory, TaskStatus, TaskStep,
};
use crate::domain::ports::store::{
    AgentStore, CircleStore, MemoryQuery, MemoryStore, PipelineStore, ScheduleStore, StoreResult,
    TaskStore,
};

#[derive(Default)]
struct Tables {
    agents: HashMap<Uuid, Agent>,
    circles: HashMap<Uuid, Circle>,
    tasks: HashMap<Uuid, BackgroundTask>,
    steps: HashMap<Uuid, Vec<TaskStep>>,
    actions: HashMap<Uuid, ScheduledAction>,
    runs: HashMap<Uuid, ScheduledRun>,
    pipelines: HashMap<Uuid, Pipeline>,
    pipeline_runs: HashMap<Uuid, PipelineRun>,
    memories: HashMap<Uuid, Memory>,
}

/// All tables behind one async mutex; the single lock stands in for the
/// SQL engine's serialization and keeps claim semantics atomic.
#[derive(Default)]
pub struct MemStore {
    tables: Mutex<Tables>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl AgentStore for MemStore {
    async fn upsert_agent(&self, agent: &Agent) -> StoreResult<()> {
        self.tables.lock().await.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: Uuid) -> StoreResult<Option<Agent>> {
        Ok(self.tables.lock().await.agents.get(&id).cloned())
    }

    async fn list_agents(&self, active_only: bool) -> StoreResult<Vec<Agent>> {
        let tables = self.tables.lock().await;
        let mut agents: Vec<Agent> = tables
            .agents
            .values()
            .filter(|a| !active_only || a.active)
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    async fn update_agent_metrics(&self, id: Uuid, metrics: AgentMetrics) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let agent = tables.agents.get_mut(&id).ok_or(StoreError::RowNotFound)?;
        agent.metrics = metrics;
        agent.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl CircleStore for MemStore {
    async fn upsert_circle(&self, circle: &Circle) -> StoreResult<()> {
        self.tables
            .lock()
            .await
            .circles
            .insert(circle.id, circle.clone());
        Ok(())
    }

    async fn get_circle(&self, id: Uuid) -> StoreResult<Option<Circle>> {
        Ok(self.tables.lock().await.circles.get(&id).cloned())
    }

    async fn get_circle_by_name(&self, name: &str) -> StoreResult<Option<Circle>> {
        Ok(self
            .tables
            .lock()
            .await
            .circles
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn list_circles(&self) -> StoreResult<Vec<Circle>> {
        let tables = self.tables.lock().await;
        let mut circles: Vec<Circle> = tables.circles.values().cloned().collect();
        circles.sort_by_key(|c| c.created_at);
        Ok(circles)
    }

    async fn list_active_circles(&self) -> StoreResult<Vec<Circle>> {
        let tables = self.tables.lock().await;
        let mut circles: Vec<Circle> = tables
            .circles
            .values()
            .filter(|c| c.status == CircleStatus::Running)
            .cloned()
            .collect();
        circles.sort_by_key(|c| c.created_at);
        Ok(circles)
    }

    async fn update_circle_status(&self, id: Uuid, status: CircleStatus) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let circle = tables.circles.get_mut(&id).ok_or(StoreError::RowNotFound)?;
        circle.status = status;
        circle.updated_at = Utc::now();
        Ok(())
    }

    async fn circles_for_agent(&self, agent_id: Uuid) -> StoreResult<Vec<Uuid>> {
        Ok(self
            .tables
            .lock()
            .await
            .circles
            .values()
            .filter(|c| c.members.iter().any(|m| m.agent_id == agent_id))
            .map(|c| c.id)
            .collect())
    }
}

#[async_trait]
impl TaskStore for MemStore {
    async fn create_task(&self, task: &BackgroundTask) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.tasks.contains_key(&task.id) {
            return Err(StoreError::ConstraintViolation(format!(
                "task {} exists",
                task.id
            )));
        }
        tables.tasks.insert(task.id, task.clone());
        tables.steps.insert(task.id, Vec::new());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<BackgroundTask>> {
        Ok(self.tables.lock().await.tasks.get(&id).cloned())
    }

    async fn update_task(&self, task: &BackgroundTask) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.tasks.contains_key(&task.id) {
            return Err(StoreError::RowNotFound);
        }
        tables.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn claim_task(&self, id: Uuid, from: &[TaskStatus]) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let task = tables.tasks.get_mut(&id).ok_or(StoreError::RowNotFound)?;
        if !from.contains(&task.status) {
            return Ok(false);
        }
        task.status = TaskStatus::Running;
        if task.started_at.is_none() {
            task.started_at = Some(Utc::now());
        }
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<BackgroundTask>> {
        let tables = self.tables.lock().await;
        let mut tasks: Vec<BackgroundTask> = tables
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn list_in_flight_tasks(&self) -> StoreResult<Vec<BackgroundTask>> {
        let tables = self.tables.lock().await;
        let mut tasks: Vec<BackgroundTask> = tables
            .tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Running | TaskStatus::Paused))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn append_step(&self, step: &TaskStep) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let steps = tables
            .steps
            .get_mut(&step.task_id)
            .ok_or(StoreError::RowNotFound)?;
        if steps.iter().any(|s| s.step_number == step.step_number) {
            return Err(StoreError::ConstraintViolation(format!(
                "duplicate step {} for task {}",
                step.step_number, step.task_id
            )));
        }
        steps.push(step.clone());
        Ok(())
    }

    async fn list_steps(&self, task_id: Uuid) -> StoreResult<Vec<TaskStep>> {
        let tables = self.tables.lock().await;
        let mut steps = tables.steps.get(&task_id).cloned().unwrap_or_default();
        steps.sort_by_key(|s| s.step_number);
        Ok(steps)
    }

    async fn persist_checkpoint(
        &self,
        task_id: Uuid,
        current_step: u32,
        progress_percent: f64,
        progress_summary: &str,
        checkpoint: &serde_json::Value,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::RowNotFound)?;
        task.current_step = current_step;
        task.progress_percent = progress_percent;
        task.progress_summary = progress_summary.to_string();
        task.checkpoint = Some(checkpoint.clone());
        task.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for MemStore {
    async fn create_action(&self, action: &ScheduledAction) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.actions.values().any(|a| a.name == action.name) {
            return Err(StoreError::ConstraintViolation(format!(
                "action name '{}' exists",
                action.name
            )));
        }
        tables.actions.insert(action.id, action.clone());
        Ok(())
    }

    async fn get_action(&self, id: Uuid) -> StoreResult<Option<ScheduledAction>> {
        Ok(self.tables.lock().await.actions.get(&id).cloned())
    }

    async fn update_action(&self, action: &ScheduledAction) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.actions.contains_key(&action.id) {
            return Err(StoreError::RowNotFound);
        }
        tables.actions.insert(action.id, action.clone());
        Ok(())
    }

    async fn delete_action(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.actions.remove(&id);
        tables.runs.retain(|_, r| r.action_id != id);
        Ok(())
    }

    async fn list_actions(&self) -> StoreResult<Vec<ScheduledAction>> {
        let tables = self.tables.lock().await;
        let mut actions: Vec<ScheduledAction> = tables.actions.values().cloned().collect();
        actions.sort_by_key(|a| a.created_at);
        Ok(actions)
    }

    async fn list_due_actions(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduledAction>> {
        let tables = self.tables.lock().await;
        let mut due: Vec<ScheduledAction> = tables
            .actions
            .values()
            .filter(|a| {
                a.status == crate::domain::models::ScheduleStatus::Active
                    && a.next_run_at.is_some_and(|t| t <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|a| a.next_run_at);
        Ok(due)
    }

    async fn list_event_actions(&self) -> StoreResult<Vec<ScheduledAction>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .actions
            .values()
            .filter(|a| {
                a.status == crate::domain::models::ScheduleStatus::Active
                    && a.event_trigger().is_some()
            })
            .cloned()
            .collect())
    }

    async fn create_run(&self, run: &ScheduledRun) -> StoreResult<()> {
        self.tables.lock().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &ScheduledRun) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.runs.contains_key(&run.id) {
            return Err(StoreError::RowNotFound);
        }
        tables.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn list_runs(&self, action_id: Uuid) -> StoreResult<Vec<ScheduledRun>> {
        let tables = self.tables.lock().await;
        let mut runs: Vec<ScheduledRun> = tables
            .runs
            .values()
            .filter(|r| r.action_id == action_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.run_number);
        Ok(runs)
    }

    async fn list_open_runs(&self) -> StoreResult<Vec<ScheduledRun>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .runs
            .values()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect())
    }

    async fn has_open_run(&self, action_id: Uuid) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .runs
            .values()
            .any(|r| r.action_id == action_id && !r.is_terminal()))
    }

    async fn find_run_by_task(&self, task_id: Uuid) -> StoreResult<Option<ScheduledRun>> {
        Ok(self
            .tables
            .lock()
            .await
            .runs
            .values()
            .find(|r| r.task_id == task_id)
            .cloned())
    }
}

#[async_trait]
impl PipelineStore for MemStore {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()> {
        self.tables
            .lock()
            .await
            .pipelines
            .insert(pipeline.id, pipeline.clone());
        Ok(())
    }

    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Option<Pipeline>> {
        Ok(self.tables.lock().await.pipelines.get(&id).cloned())
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.pipelines.contains_key(&pipeline.id) {
            return Err(StoreError::RowNotFound);
        }
        tables.pipelines.insert(pipeline.id, pipeline.clone());
        Ok(())
    }

    async fn list_pipelines(&self) -> StoreResult<Vec<Pipeline>> {
        let tables = self.tables.lock().await;
        let mut pipelines: Vec<Pipeline> = tables.pipelines.values().cloned().collect();
        pipelines.sort_by_key(|p| p.created_at);
        Ok(pipelines)
    }

    async fn create_pipeline_run(&self, run: &PipelineRun) -> StoreResult<()> {
        self.tables
            .lock()
            .await
            .pipeline_runs
            .insert(run.id, run.clone());
        Ok(())
    }

    async fn get_pipeline_run(&self, id: Uuid) -> StoreResult<Option<PipelineRun>> {
        Ok(self.tables.lock().await.pipeline_runs.get(&id).cloned())
    }

    async fn update_pipeline_run(&self, run: &PipelineRun) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.pipeline_runs.contains_key(&run.id) {
            return Err(StoreError::RowNotFound);
        }
        tables.pipeline_runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn list_pipeline_runs(&self, pipeline_id: Uuid) -> StoreResult<Vec<PipelineRun>> {
        let tables = self.tables.lock().await;
        let mut runs: Vec<PipelineRun> = tables
            .pipeline_runs
            .values()
            .filter(|r| r.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }
}

#[async_trait]
impl MemoryStore for MemStore {
    async fn insert_memory(&self, memory: &Memory) -> StoreResult<()> {
        self.tables
            .lock()
            .await
            .memories
            .insert(memory.id, memory.clone());
        Ok(())
    }

    async fn get_memory(&self, id: Uuid) -> StoreResult<Option<Memory>> {
        Ok(self.tables.lock().await.memories.get(&id).cloned())
    }

    async fn search_memories(&self, query: &MemoryQuery) -> StoreResult<Vec<ScoredMemory>> {
        let tables = self.tables.lock().await;
        let mut scored: Vec<ScoredMemory> = tables
            .memories
            .values()
            .filter(|m| m.visible_to(query.agent_id, &query.circles, &query.projects))
            .filter(|m| query.memory_type.is_none_or(|t| m.memory_type == t))
            .filter(|m| {
                query.tags.is_empty() || query.tags.iter().all(|t| m.tags.contains(t))
            })
            .map(|m| ScoredMemory {
                similarity: cosine_similarity(&m.embedding, &query.embedding),
                memory: m.clone(),
            })
            .filter(|s| s.similarity >= query.threshold)
            .collect();
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
        let mut tables = self.tables.lock().await;
        let memory = tables.memories.get_mut(&id).ok_or(StoreError::RowNotFound)?;
        memory.forgotten = true;
        memory.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_access(&self, ids: &[Uuid]) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        for id in ids {
            if let Some(memory) = tables.memories.get_mut(id) {
                memory.access_count += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ScheduleSpec;

    #[tokio::test]
    async fn test_claim_gate_single_winner() {
        let store = MemStore::new();
        let task = BackgroundTask::new(Uuid::new_v4(), "claim me");
        store.create_task(&task).await.unwrap();

        assert!(store
            .claim_task(task.id, &[TaskStatus::Pending])
            .await
            .unwrap());
        // Second claim from pending loses: the row is now running.
        assert!(!store
            .claim_task(task.id, &[TaskStatus::Pending])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_step_rejected() {
        let store = MemStore::new();
        let task = BackgroundTask::new(Uuid::new_v4(), "steps");
        store.create_task(&task).await.unwrap();

        let step = TaskStep::new(task.id, 1, crate::domain::models::StepAction::Plan);
        store.append_step(&step).await.unwrap();
        let dup = TaskStep::new(task.id, 1, crate::domain::models::StepAction::Execute);
        assert!(matches!(
            store.append_step(&dup).await,
            Err(StoreError::ConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_unique_action_names() {
        let store = MemStore::new();
        let a1 = ScheduledAction::new(
            Uuid::new_v4(),
            "nightly",
            "g",
            ScheduleSpec::Interval { interval_seconds: 60 },
        )
        .unwrap();
        let a2 = ScheduledAction::new(
            Uuid::new_v4(),
            "nightly",
            "g",
            ScheduleSpec::Interval { interval_seconds: 60 },
        )
        .unwrap();
        store.create_action(&a1).await.unwrap();
        assert!(matches!(
            store.create_action(&a2).await,
            Err(StoreError::ConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_search_scoping_and_order() {
        let store = MemStore::new();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let embedding = vec![1.0, 0.0, 0.0];
        let near = Memory::new(
            owner,
            "near",
            crate::domain::models::MemoryType::Fact,
            crate::domain::models::MemoryScope::Agent,
            None,
            0.5,
        )
        .unwrap()
        .with_embedding(vec![0.9, 0.1, 0.0]);
        let far = Memory::new(
            owner,
            "far",
            crate::domain::models::MemoryType::Fact,
            crate::domain::models::MemoryScope::Agent,
            None,
            0.5,
        )
        .unwrap()
        .with_embedding(vec![0.0, 1.0, 0.0]);
        store.insert_memory(&near).await.unwrap();
        store.insert_memory(&far).await.unwrap();

        let results = store
            .search_memories(&MemoryQuery::new(owner, embedding.clone()))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.content, "near");

        // A stranger sees nothing agent-scoped.
        let results = store
            .search_memories(&MemoryQuery::new(stranger, embedding))
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
