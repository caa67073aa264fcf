//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use coterie::domain::models::config::{ExecutorConfig, SchedulerConfig};
use coterie::domain::models::{BackgroundTask, PipelineRun, ScheduledAction, ScheduledRun};
use coterie::domain::ports::store::{PipelineStore, ScheduleStore, TaskStore};
use coterie::domain::ports::ScriptedWorker;
use coterie::infrastructure::MemStore;
use coterie::services::{BackgroundExecutor, EventBus, Scheduler};

const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_STEP: Duration = Duration::from_millis(10);

pub struct Harness {
    pub store: Arc<MemStore>,
    pub bus: Arc<EventBus>,
    pub executor: Arc<BackgroundExecutor>,
}

/// Store + bus + executor with default config.
pub fn harness() -> Harness {
    let store = MemStore::shared();
    let bus = Arc::new(EventBus::new(1000));
    let executor = Arc::new(BackgroundExecutor::new(
        store.clone(),
        bus.clone(),
        ExecutorConfig::default(),
    ));
    Harness {
        store,
        bus,
        executor,
    }
}

/// A second executor over the same store and bus, as after a restart.
pub fn restarted_executor(h: &Harness) -> Arc<BackgroundExecutor> {
    Arc::new(BackgroundExecutor::new(
        h.store.clone(),
        h.bus.clone(),
        ExecutorConfig::default(),
    ))
}

/// Scheduler over the harness with a given default worker.
pub fn scheduler_for(h: &Harness, worker: Arc<ScriptedWorker>) -> Scheduler {
    Scheduler::new(
        h.store.clone(),
        h.bus.clone(),
        h.executor.clone(),
        worker,
        SchedulerConfig::default(),
    )
}

/// Poll a background task until `pred` holds.
pub async fn wait_task(
    store: &MemStore,
    task_id: uuid::Uuid,
    pred: impl Fn(&BackgroundTask) -> bool,
) -> BackgroundTask {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        if let Some(task) = store.get_task(task_id).await.unwrap() {
            if pred(&task) {
                return task;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("task {task_id} did not reach the expected state");
        }
        tokio::time::sleep(POLL_STEP).await;
    }
}

/// Poll a background task until it reaches any terminal state.
pub async fn wait_task_terminal(store: &MemStore, task_id: uuid::Uuid) -> BackgroundTask {
    wait_task(store, task_id, |t| t.status.is_terminal()).await
}

/// Poll a scheduled action until `pred` holds.
pub async fn wait_action(
    store: &MemStore,
    action_id: uuid::Uuid,
    pred: impl Fn(&ScheduledAction) -> bool,
) -> ScheduledAction {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        if let Some(action) = store.get_action(action_id).await.unwrap() {
            if pred(&action) {
                return action;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("action {action_id} did not reach the expected state");
        }
        tokio::time::sleep(POLL_STEP).await;
    }
}

/// Poll an action's run rows until `pred` holds.
pub async fn wait_runs(
    store: &MemStore,
    action_id: uuid::Uuid,
    pred: impl Fn(&[ScheduledRun]) -> bool,
) -> Vec<ScheduledRun> {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        let runs = store.list_runs(action_id).await.unwrap();
        if pred(&runs) {
            return runs;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("runs of {action_id} did not reach the expected state");
        }
        tokio::time::sleep(POLL_STEP).await;
    }
}

/// Poll a pipeline run until it reaches a terminal state.
pub async fn wait_pipeline_run_terminal(store: &MemStore, run_id: uuid::Uuid) -> PipelineRun {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        if let Some(run) = store.get_pipeline_run(run_id).await.unwrap() {
            if run.status.is_terminal() {
                return run;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("pipeline run {run_id} never reached a terminal state");
        }
        tokio::time::sleep(POLL_STEP).await;
    }
}

/// Poll a pipeline definition until `pred` holds.
pub async fn wait_pipeline(
    store: &MemStore,
    pipeline_id: uuid::Uuid,
    pred: impl Fn(&coterie::domain::models::Pipeline) -> bool,
) -> coterie::domain::models::Pipeline {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        if let Some(pipeline) = store.get_pipeline(pipeline_id).await.unwrap() {
            if pred(&pipeline) {
                return pipeline;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("pipeline {pipeline_id} did not reach the expected state");
        }
        tokio::time::sleep(POLL_STEP).await;
    }
}
