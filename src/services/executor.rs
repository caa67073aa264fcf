//! Background task executor.
//!
//! Drives the plan-act-checkpoint loop for goal-directed background
//! tasks: claim a task row, call the Worker in bounded steps, record an
//! immutable step trail, checkpoint progress, and honor pause/cancel at
//! iteration boundaries. Crash recovery rehydrates in-flight tasks from
//! their last persisted checkpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::timeout;
use uuid::Uuid;

use crate::domain::error::{DomainResult, TaskError, WorkerError};
use crate::domain::models::config::ExecutorConfig;
use crate::domain::models::{
    BackgroundTask, Event, EventType, StepAction, TaskOptions, TaskStatus, TaskStep,
};
use crate::domain::ports::{ContextProvider, Store, Worker, WorkerContext};
use crate::services::event_bus::EventBus;

/// Error message recorded when the step budget runs out.
const STEP_LIMIT_MESSAGE: &str = "step limit exceeded";

/// Cooperative control flags, checked at each iteration boundary.
struct ControlFlags {
    pause: AtomicBool,
    cancel: AtomicBool,
}

impl ControlFlags {
    fn new() -> Self {
        Self {
            pause: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        }
    }
}

struct TaskHandle {
    control: Arc<ControlFlags>,
    join: tokio::task::JoinHandle<()>,
}

/// Durable executor of goal-directed loops.
pub struct BackgroundExecutor {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    config: ExecutorConfig,
    context: Option<Arc<dyn ContextProvider>>,
    loops: Arc<RwLock<HashMap<Uuid, TaskHandle>>>,
    pool: Arc<Semaphore>,
}

impl BackgroundExecutor {
    pub fn new(store: Arc<dyn Store>, bus: Arc<EventBus>, config: ExecutorConfig) -> Self {
        let pool = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        Self {
            store,
            bus,
            config,
            context: None,
            loops: Arc::new(RwLock::new(HashMap::new())),
            pool,
        }
    }

    /// Attach a context provider used to compose Worker turn context.
    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(provider);
        self
    }

    /// Insert a new task and spawn its loop. Refuses with a typed error
    /// when the worker pool is at capacity.
    pub async fn start(
        &self,
        agent_id: Uuid,
        goal: impl Into<String>,
        options: TaskOptions,
        worker: Arc<dyn Worker>,
    ) -> DomainResult<Uuid> {
        let permit = self.acquire_slot()?;

        let mut task = BackgroundTask::new(agent_id, goal)
            .with_bounds(
                options.max_steps.unwrap_or(self.config.default_max_steps),
                options
                    .timeout_seconds
                    .unwrap_or(self.config.default_timeout_seconds),
            )
            .with_checkpoint_interval(
                options
                    .checkpoint_interval
                    .unwrap_or(self.config.default_checkpoint_interval),
            );
        if let Some(circle) = options.circle_id {
            task = task.with_circle(circle);
        }
        if let Some(id) = options.task_id {
            task.id = id;
        }

        self.store.create_task(&task).await?;
        self.publish_lifecycle(EventType::BackgroundTaskCreated, &task).await;

        let claimed = self
            .store
            .claim_task(task.id, &[TaskStatus::Pending])
            .await?;
        if !claimed {
            return Err(TaskError::AlreadyClaimed(task.id).into());
        }
        task.transition_to(TaskStatus::Running)?;
        self.publish_lifecycle(EventType::BackgroundTaskStarted, &task).await;

        self.spawn_loop(task.id, worker, permit).await;
        Ok(task.id)
    }

    /// Request a pause; the loop honors it at the next iteration boundary.
    pub async fn pause(&self, task_id: Uuid) -> DomainResult<()> {
        {
            let loops = self.loops.read().await;
            if let Some(handle) = loops.get(&task_id) {
                handle.control.pause.store(true, Ordering::SeqCst);
                return Ok(());
            }
        }
        // No loop in this process: distinguish a wrong-state task from a
        // missing one.
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(TaskError::NotFound(task_id))?;
        Err(TaskError::WrongStatus {
            id: task_id,
            expected: TaskStatus::Running.as_str().to_string(),
            actual: task.status.as_str().to_string(),
        }
        .into())
    }

    /// Resume a paused task from its latest checkpoint.
    pub async fn resume(&self, task_id: Uuid, worker: Arc<dyn Worker>) -> DomainResult<()> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(TaskError::NotFound(task_id))?;
        if task.status != TaskStatus::Paused {
            return Err(TaskError::WrongStatus {
                id: task_id,
                expected: TaskStatus::Paused.as_str().to_string(),
                actual: task.status.as_str().to_string(),
            }
            .into());
        }

        let permit = self.acquire_slot()?;
        let claimed = self
            .store
            .claim_task(task_id, &[TaskStatus::Paused])
            .await?;
        if !claimed {
            return Err(TaskError::AlreadyClaimed(task_id).into());
        }
        self.publish_lifecycle(EventType::BackgroundTaskResumed, &task).await;
        self.spawn_loop(task_id, worker, permit).await;
        Ok(())
    }

    /// Request cancellation. A loop in flight finishes its current step;
    /// tasks with no loop (pending or paused) are cancelled directly.
    pub async fn cancel(&self, task_id: Uuid) -> DomainResult<()> {
        {
            let loops = self.loops.read().await;
            if let Some(handle) = loops.get(&task_id) {
                handle.control.cancel.store(true, Ordering::SeqCst);
                return Ok(());
            }
        }

        let mut task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(TaskError::NotFound(task_id))?;
        transition_and_save(self.store.as_ref(), &mut task, TaskStatus::Cancelled).await?;
        self.publish_lifecycle(EventType::BackgroundTaskCancelled, &task).await;
        Ok(())
    }

    /// Current persisted state of a task.
    pub async fn status(&self, task_id: Uuid) -> DomainResult<BackgroundTask> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id).into())
    }

    /// Startup recovery: re-enter loops for tasks left running by a
    /// previous process; paused tasks stay paused until resumed.
    pub async fn recover_tasks(&self, worker: Arc<dyn Worker>) -> DomainResult<usize> {
        let in_flight = self.store.list_in_flight_tasks().await?;
        let mut recovered = 0;
        for task in in_flight {
            if task.status != TaskStatus::Running {
                continue;
            }
            let Ok(permit) = self.acquire_slot() else {
                tracing::warn!(task_id = %task.id, "recovery deferred: executor at capacity");
                break;
            };
            let claimed = self
                .store
                .claim_task(task.id, &[TaskStatus::Running])
                .await?;
            if !claimed {
                continue;
            }
            tracing::info!(task_id = %task.id, step = task.current_step, "recovering task from checkpoint");
            self.spawn_loop(task.id, worker.clone(), permit).await;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Graceful shutdown: signal pause everywhere, wait up to `grace` for
    /// iteration boundaries, then abort what remains. A zero grace skips
    /// the pause signal entirely and aborts outright, which is also how
    /// tests simulate a crash.
    pub async fn shutdown(&self, grace: Duration) {
        if !grace.is_zero() {
            let loops = self.loops.read().await;
            for handle in loops.values() {
                handle.control.pause.store(true, Ordering::SeqCst);
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.loops.read().await.is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut loops = self.loops.write().await;
        for (task_id, handle) in loops.drain() {
            tracing::warn!(%task_id, "aborting task loop past shutdown grace");
            handle.join.abort();
        }
    }

    /// Number of loops currently running in this process.
    pub async fn running_count(&self) -> usize {
        self.loops.read().await.len()
    }

    fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, TaskError> {
        let max = self.config.max_concurrent_tasks;
        self.pool.clone().try_acquire_owned().map_err(|_| {
            TaskError::CapacityExhausted {
                running: max,
                max,
            }
        })
    }

    async fn publish_lifecycle(&self, event_type: EventType, task: &BackgroundTask) {
        self.bus
            .publish(lifecycle_event(event_type, task))
            .await;
    }

    async fn spawn_loop(&self, task_id: Uuid, worker: Arc<dyn Worker>, permit: OwnedSemaphorePermit) {
        let control = Arc::new(ControlFlags::new());
        let loop_ctx = LoopContext {
            store: self.store.clone(),
            bus: self.bus.clone(),
            config: self.config.clone(),
            context: self.context.clone(),
            control: control.clone(),
            worker,
        };
        let loops = self.loops.clone();

        // The loop must not start (or finish) before its handle is
        // registered, or the map entry would outlive the loop.
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            let _permit = permit;
            let _ = ready_rx.await;
            run_loop(loop_ctx, task_id).await;
            loops.write().await.remove(&task_id);
        });

        self.loops
            .write()
            .await
            .insert(task_id, TaskHandle { control, join });
        let _ = ready_tx.send(());
    }
}

struct LoopContext {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    config: ExecutorConfig,
    context: Option<Arc<dyn ContextProvider>>,
    control: Arc<ControlFlags>,
    worker: Arc<dyn Worker>,
}

/// One full plan-act-checkpoint loop until a terminal state or pause.
async fn run_loop(ctx: LoopContext, task_id: Uuid) {
    let mut task = match ctx.store.get_task(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            tracing::error!(%task_id, "task vanished before loop start");
            return;
        }
        Err(e) => {
            tracing::error!(%task_id, error = %e, "failed to load task for loop");
            return;
        }
    };

    // The claim already moved the row to running; mirror it in memory.
    if task.status != TaskStatus::Running {
        task.status = TaskStatus::Running;
        if task.started_at.is_none() {
            task.started_at = Some(Utc::now());
        }
    }

    // Step rows get their own monotonic sequence; iterations are counted
    // by current_step.
    let mut step_seq = match ctx.store.list_steps(task_id).await {
        Ok(steps) => steps.last().map(|s| s.step_number).unwrap_or(0),
        Err(_) => 0,
    };

    let worker_deadline = Duration::from_secs(ctx.config.worker_call_timeout_seconds);

    loop {
        // Control flags first: cancellation wins over pause.
        if ctx.control.cancel.load(Ordering::SeqCst) {
            finish(&ctx, &mut task, TaskStatus::Cancelled, None).await;
            return;
        }
        if ctx.control.pause.load(Ordering::SeqCst) {
            if transition_and_save(ctx.store.as_ref(), &mut task, TaskStatus::Paused)
                .await
                .is_ok()
            {
                ctx.bus
                    .publish(lifecycle_event(EventType::BackgroundTaskPaused, &task))
                    .await;
            }
            return;
        }

        if task.current_step >= task.max_steps {
            finish(&ctx, &mut task, TaskStatus::Failed, Some(STEP_LIMIT_MESSAGE.into())).await;
            return;
        }
        if task.elapsed_seconds(Utc::now()) >= task.timeout_seconds {
            finish(&ctx, &mut task, TaskStatus::Timeout, None).await;
            return;
        }

        let iteration = task.current_step + 1;
        let worker_ctx = compose_context(&ctx, &task).await;

        // Plan.
        let plan_started = std::time::Instant::now();
        task.metrics.llm_calls += 1;
        let planned = match bounded(worker_deadline, ctx.worker.plan(&task.goal, &worker_ctx)).await
        {
            Ok(action) => action,
            Err(err) => {
                step_seq += 1;
                let step = TaskStep::new(task_id, step_seq, StepAction::Plan)
                    .with_io(task.goal.clone(), format!("error: {err}"))
                    .with_usage(plan_started.elapsed().as_millis() as u64, 0);
                let _ = ctx.store.append_step(&step).await;
                if let WorkerError::Permanent(msg) = err {
                    finish(&ctx, &mut task, TaskStatus::Failed, Some(msg)).await;
                    return;
                }
                // Transient plan failure consumes the iteration.
                task.current_step = iteration;
                if !save_progress(&ctx, &mut task).await {
                    return;
                }
                continue;
            }
        };
        step_seq += 1;
        let plan_step = TaskStep::new(task_id, step_seq, StepAction::Plan)
            .with_io(task.goal.clone(), planned.clone())
            .with_usage(plan_started.elapsed().as_millis() as u64, 0);
        if ctx.store.append_step(&plan_step).await.is_err() {
            tracing::warn!(%task_id, "failed to append plan step");
        }

        // Execute.
        let exec_started = std::time::Instant::now();
        task.metrics.llm_calls += 1;
        let outcome = match bounded(
            worker_deadline,
            ctx.worker.execute_action(&planned, &task.goal),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                step_seq += 1;
                let step = TaskStep::new(task_id, step_seq, StepAction::Execute)
                    .with_io(planned.clone(), format!("error: {err}"))
                    .with_usage(exec_started.elapsed().as_millis() as u64, 0);
                let _ = ctx.store.append_step(&step).await;
                if let WorkerError::Permanent(msg) = err {
                    finish(&ctx, &mut task, TaskStatus::Failed, Some(msg)).await;
                    return;
                }
                task.current_step = iteration;
                if !save_progress(&ctx, &mut task).await {
                    return;
                }
                continue;
            }
        };

        task.metrics.tokens_used += outcome.tokens_used;
        task.metrics.tool_calls += outcome.tool_calls.len() as u64;

        step_seq += 1;
        let exec_output = match &outcome.error {
            Some(e) => format!("{} (error: {})", outcome.output, e),
            None => outcome.output.clone(),
        };
        let exec_step = TaskStep::new(task_id, step_seq, StepAction::Execute)
            .with_io(planned.clone(), exec_output)
            .with_usage(
                exec_started.elapsed().as_millis() as u64,
                outcome.tokens_used,
            );
        if ctx.store.append_step(&exec_step).await.is_err() {
            tracing::warn!(%task_id, "failed to append execute step");
        }

        for tool in &outcome.tool_calls {
            step_seq += 1;
            let tool_step = TaskStep::new(task_id, step_seq, StepAction::ToolCall)
                .with_io(tool.input.clone(), tool.output.clone())
                .with_tool(tool.tool_name.clone())
                .with_usage(tool.duration_ms, 0);
            let _ = ctx.store.append_step(&tool_step).await;
        }

        task.current_step = iteration;
        task.progress_percent =
            f64::from(iteration) / f64::from(task.max_steps.max(1)) * 100.0;
        task.progress_summary = summarize(&planned);
        task.checkpoint = Some(json!({
            "iteration": iteration,
            "last_action": planned,
            "last_output": outcome.output,
        }));

        ctx.bus
            .publish(
                Event::new(
                    EventType::BackgroundTaskStep,
                    json!({
                        "task_id": task_id.to_string(),
                        "step": iteration,
                        "action": planned,
                    }),
                )
                .with_agent(task.agent_id),
            )
            .await;

        // Checkpoint boundary: persist progress + blob atomically.
        if task.checkpoint_due(iteration) {
            let blob = task.checkpoint.clone().unwrap_or(serde_json::Value::Null);
            match ctx
                .store
                .persist_checkpoint(
                    task_id,
                    task.current_step,
                    task.progress_percent,
                    &task.progress_summary,
                    &blob,
                )
                .await
            {
                Ok(()) => {
                    step_seq += 1;
                    let cp_step = TaskStep::new(task_id, step_seq, StepAction::Checkpoint)
                        .with_io(String::new(), format!("checkpoint at step {iteration}"));
                    let _ = ctx.store.append_step(&cp_step).await;
                    ctx.bus
                        .publish(
                            Event::new(
                                EventType::BackgroundTaskCheckpoint,
                                json!({
                                    "task_id": task_id.to_string(),
                                    "step": iteration,
                                    "progress_percent": task.progress_percent,
                                }),
                            )
                            .with_agent(task.agent_id),
                        )
                        .await;
                }
                Err(e) => {
                    tracing::warn!(%task_id, error = %e, "checkpoint persist failed");
                }
            }
        } else if !save_progress(&ctx, &mut task).await {
            return;
        }

        // Completion: sentinel in the output, or the Worker's judgment.
        let complete = outcome.has_complete_sentinel() || {
            let state = task.checkpoint.clone().unwrap_or(serde_json::Value::Null);
            matches!(
                bounded(worker_deadline, ctx.worker.is_goal_complete(&task.goal, &state)).await,
                Ok(true)
            )
        };
        if complete {
            task.final_result = Some(
                outcome
                    .output
                    .replace(crate::domain::ports::COMPLETE_SENTINEL, "")
                    .trim()
                    .to_string(),
            );
            finish(&ctx, &mut task, TaskStatus::Completed, None).await;
            return;
        }
    }
}

/// Await a worker call under the per-call deadline.
async fn bounded<T>(
    deadline: Duration,
    fut: impl std::future::Future<Output = Result<T, WorkerError>>,
) -> Result<T, WorkerError> {
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::Timeout(deadline.as_secs())),
    }
}

async fn compose_context(ctx: &LoopContext, task: &BackgroundTask) -> WorkerContext {
    match &ctx.context {
        Some(provider) => provider.compose(task.agent_id, &task.goal).await,
        None => WorkerContext::default(),
    }
}

fn summarize(action: &str) -> String {
    action.chars().take(200).collect()
}

/// Transition with the Store as the source of truth: if the write fails,
/// the in-memory status rolls back and no event should be published.
async fn transition_and_save(
    store: &dyn Store,
    task: &mut BackgroundTask,
    to: TaskStatus,
) -> DomainResult<()> {
    let before = task.clone();
    task.transition_to(to)?;
    if let Err(e) = store.update_task(task).await {
        *task = before;
        return Err(e.into());
    }
    Ok(())
}

/// Persist non-transition progress. Returns false when the loop must stop
/// because the write path is broken.
async fn save_progress(ctx: &LoopContext, task: &mut BackgroundTask) -> bool {
    task.updated_at = Utc::now();
    if let Err(e) = ctx.store.update_task(task).await {
        tracing::error!(task_id = %task.id, error = %e, "progress persist failed; stopping loop");
        return false;
    }
    true
}

/// Terminal transition + event publication + owner metrics update.
async fn finish(
    ctx: &LoopContext,
    task: &mut BackgroundTask,
    status: TaskStatus,
    error_message: Option<String>,
) {
    task.error_message = error_message;
    if let Err(e) = transition_and_save(ctx.store.as_ref(), task, status).await {
        tracing::error!(task_id = %task.id, error = %e, "terminal transition failed");
        return;
    }

    let event_type = match status {
        TaskStatus::Completed => EventType::BackgroundTaskCompleted,
        TaskStatus::Cancelled => EventType::BackgroundTaskCancelled,
        // Timeout rides the failed wire type with a status marker.
        TaskStatus::Failed | TaskStatus::Timeout => EventType::BackgroundTaskFailed,
        _ => EventType::BackgroundTaskFailed,
    };
    ctx.bus.publish(lifecycle_event(event_type, task)).await;

    if status == TaskStatus::Completed {
        if let Ok(Some(mut agent)) = ctx.store.get_agent(task.agent_id).await {
            agent.metrics.record_completion(None);
            if let Err(e) = ctx
                .store
                .update_agent_metrics(agent.id, agent.metrics)
                .await
            {
                tracing::warn!(agent_id = %agent.id, error = %e, "agent metrics update failed");
            }
        }
    }
}

fn lifecycle_event(event_type: EventType, task: &BackgroundTask) -> Event {
    let mut data = json!({
        "task_id": task.id.to_string(),
        "goal": task.goal,
        "status": task.status.as_str(),
        "current_step": task.current_step,
    });
    if let Some(ref msg) = task.error_message {
        data["error"] = json!(msg);
    }
    if let Some(ref result) = task.final_result {
        data["final_result"] = json!(result);
    }
    let mut event = Event::new(event_type, data).with_agent(task.agent_id);
    if let Some(circle) = task.circle_id {
        event = event.with_circle(circle);
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ActionOutcome, ScriptedWorker};
    use crate::domain::ports::store::TaskStore;
    use crate::infrastructure::memstore::MemStore;

    fn executor_with(config: ExecutorConfig) -> (BackgroundExecutor, Arc<MemStore>, Arc<EventBus>) {
        let store = Arc::new(MemStore::new());
        let bus = Arc::new(EventBus::new(1000));
        let exec = BackgroundExecutor::new(store.clone(), bus.clone(), config);
        (exec, store, bus)
    }

    async fn wait_terminal(store: &MemStore, task_id: Uuid) -> BackgroundTask {
        for _ in 0..200 {
            if let Some(task) = store.get_task(task_id).await.unwrap() {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never reached a terminal state");
    }

    #[tokio::test]
    async fn test_sentinel_completes_task() {
        let (exec, store, _bus) = executor_with(ExecutorConfig::default());
        let worker = Arc::new(ScriptedWorker::always("4 [COMPLETE]"));

        let task_id = exec
            .start(
                Uuid::new_v4(),
                "compute 2+2 and report",
                TaskOptions {
                    max_steps: Some(5),
                    timeout_seconds: Some(60),
                    ..Default::default()
                },
                worker,
            )
            .await
            .unwrap();

        let task = wait_terminal(&store, task_id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.final_result.as_deref(), Some("4"));

        let steps = store.list_steps(task_id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action, StepAction::Plan);
        assert_eq!(steps[1].action, StepAction::Execute);
    }

    #[tokio::test]
    async fn test_step_limit_fails_task() {
        let (exec, store, _bus) = executor_with(ExecutorConfig::default());
        let worker = Arc::new(ScriptedWorker::always("still going"));

        let task_id = exec
            .start(
                Uuid::new_v4(),
                "never finishes",
                TaskOptions {
                    max_steps: Some(3),
                    timeout_seconds: Some(60),
                    ..Default::default()
                },
                worker,
            )
            .await
            .unwrap();

        let task = wait_terminal(&store, task_id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some(STEP_LIMIT_MESSAGE));
        assert_eq!(task.current_step, 3);

        let steps = store.list_steps(task_id).await.unwrap();
        let plans = steps.iter().filter(|s| s.action == StepAction::Plan).count();
        let executes = steps.iter().filter(|s| s.action == StepAction::Execute).count();
        assert_eq!(plans, 3);
        assert_eq!(executes, 3);
    }

    #[tokio::test]
    async fn test_zero_max_steps_fails_before_planning() {
        let (exec, store, _bus) = executor_with(ExecutorConfig::default());
        let worker = Arc::new(ScriptedWorker::always("anything"));

        let task_id = exec
            .start(
                Uuid::new_v4(),
                "degenerate",
                TaskOptions {
                    max_steps: Some(0),
                    ..Default::default()
                },
                worker.clone(),
            )
            .await
            .unwrap();

        let task = wait_terminal(&store, task_id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some(STEP_LIMIT_MESSAGE));
        assert_eq!(worker.plan_calls.load(Ordering::SeqCst), 0);
        assert!(store.list_steps(task_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_refusal_is_typed() {
        let config = ExecutorConfig {
            max_concurrent_tasks: 1,
            ..Default::default()
        };
        let (exec, _store, _bus) = executor_with(config);
        // A slow worker that never completes keeps the slot busy.
        let slow =
            Arc::new(ScriptedWorker::always("working").with_call_delay(Duration::from_millis(20)));

        exec.start(
            Uuid::new_v4(),
            "hog the slot",
            TaskOptions {
                max_steps: Some(10_000),
                timeout_seconds: Some(600),
                ..Default::default()
            },
            slow.clone(),
        )
        .await
        .unwrap();

        let refused = exec
            .start(Uuid::new_v4(), "second", TaskOptions::default(), slow)
            .await;
        assert!(matches!(
            refused,
            Err(crate::domain::OrchestratorError::Task(
                TaskError::CapacityExhausted { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_pause_resume_preserves_progress() {
        let (exec, store, _bus) = executor_with(ExecutorConfig::default());
        let worker =
            Arc::new(ScriptedWorker::always("stepping").with_call_delay(Duration::from_millis(5)));

        let task_id = exec
            .start(
                Uuid::new_v4(),
                "long haul",
                TaskOptions {
                    max_steps: Some(10_000),
                    timeout_seconds: Some(600),
                    checkpoint_interval: Some(2),
                    ..Default::default()
                },
                worker.clone(),
            )
            .await
            .unwrap();

        // Let a few iterations land, then pause.
        tokio::time::sleep(Duration::from_millis(50)).await;
        exec.pause(task_id).await.unwrap();
        for _ in 0..100 {
            if exec.running_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let paused = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(paused.status, TaskStatus::Paused);
        let steps_at_pause = store.list_steps(task_id).await.unwrap().len();
        let step_at_pause = paused.current_step;
        assert!(step_at_pause > 0);

        // Resume and verify execution continues past the paused point.
        exec.resume(task_id, worker).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        exec.cancel(task_id).await.unwrap();

        let finished = wait_terminal(&store, task_id).await;
        assert_eq!(finished.status, TaskStatus::Cancelled);
        assert!(finished.current_step >= step_at_pause);
        assert!(store.list_steps(task_id).await.unwrap().len() >= steps_at_pause);
    }

    #[tokio::test]
    async fn test_cancel_pending_task_without_loop() {
        let (exec, store, _bus) = executor_with(ExecutorConfig::default());
        let task = BackgroundTask::new(Uuid::new_v4(), "parked");
        store.create_task(&task).await.unwrap();

        exec.cancel(task.id).await.unwrap();
        let cancelled = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_recover_resumes_running_tasks_only() {
        let (exec, store, _bus) = executor_with(ExecutorConfig::default());

        // Simulate rows left behind by a crashed process.
        let mut running = BackgroundTask::new(Uuid::new_v4(), "was running")
            .with_bounds(4, 600);
        running.transition_to(TaskStatus::Running).unwrap();
        running.current_step = 2;
        store.create_task(&running).await.unwrap();

        let mut paused = BackgroundTask::new(Uuid::new_v4(), "was paused");
        paused.transition_to(TaskStatus::Running).unwrap();
        paused.transition_to(TaskStatus::Paused).unwrap();
        store.create_task(&paused).await.unwrap();

        let worker = Arc::new(ScriptedWorker::always("more work"));
        let recovered = exec.recover_tasks(worker).await.unwrap();
        assert_eq!(recovered, 1);

        let finished = wait_terminal(&store, running.id).await;
        // 2 steps persisted + 2 more before the 4-step bound trips.
        assert_eq!(finished.status, TaskStatus::Failed);
        assert_eq!(finished.current_step, 4);

        let still_paused = store.get_task(paused.id).await.unwrap().unwrap();
        assert_eq!(still_paused.status, TaskStatus::Paused);
    }

    #[tokio::test]
    async fn test_worker_permanent_error_fails_task() {
        struct PoisonWorker;
        #[async_trait::async_trait]
        impl Worker for PoisonWorker {
            async fn plan(&self, _: &str, _: &WorkerContext) -> Result<String, WorkerError> {
                Err(WorkerError::Permanent("model gone".into()))
            }
            async fn execute_action(
                &self,
                _: &str,
                _: &str,
            ) -> Result<ActionOutcome, WorkerError> {
                unreachable!("plan always fails")
            }
            async fn is_goal_complete(
                &self,
                _: &str,
                _: &serde_json::Value,
            ) -> Result<bool, WorkerError> {
                Ok(false)
            }
            async fn chat(&self, _: &str, _: &WorkerContext) -> Result<String, WorkerError> {
                Ok(String::new())
            }
            async fn embed(&self, _: &str) -> Result<Vec<f32>, WorkerError> {
                Ok(vec![0.0])
            }
        }

        let (exec, store, _bus) = executor_with(ExecutorConfig::default());
        let task_id = exec
            .start(
                Uuid::new_v4(),
                "doomed",
                TaskOptions::default(),
                Arc::new(PoisonWorker),
            )
            .await
            .unwrap();

        let task = wait_terminal(&store, task_id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("model gone"));
    }
}
