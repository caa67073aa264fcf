//! Scheduled action dispatcher.
//!
//! A single periodic tick queries due actions and materializes them as
//! background tasks, recording a run row per dispatch. Event-triggered
//! actions bypass the clock entirely: the scheduler subscribes to their
//! trigger events and dispatches on match. Terminal task events flow
//! back through the bus to close out runs, drive the failure-retry
//! backoff, and expire exhausted actions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::error::{DomainResult, ScheduleError, TaskError};
use crate::domain::models::config::SchedulerConfig;
use crate::domain::models::{
    Event, EventType, ScheduleSpec, ScheduleStatus, ScheduledAction, ScheduledRun, TaskOptions,
    TaskStatus, TriggeredBy,
};
use crate::domain::ports::{Store, Worker};
use crate::services::event_bus::{EventBus, EventHandler, SubscriptionId};
use crate::services::executor::BackgroundExecutor;

/// Shared internals reachable from the tick loop and event handlers.
struct Core {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    executor: Arc<BackgroundExecutor>,
    worker: Arc<dyn Worker>,
    config: SchedulerConfig,
}

impl Core {
    /// Dispatch one action now: advance the schedule, record the run,
    /// then spawn the task. The run row lands before the loop starts so
    /// even an instantly-terminal task finds its run to close.
    async fn dispatch(
        &self,
        mut action: ScheduledAction,
        triggered_by: TriggeredBy,
    ) -> DomainResult<Uuid> {
        let now = Utc::now();
        let task_id = Uuid::new_v4();

        let previous = (action.last_run_at, action.next_run_at, action.status);
        action.last_run_at = Some(now);
        action.next_run_at = action.next_fire_after(now);
        if matches!(action.spec, ScheduleSpec::Once { .. }) {
            action.status = ScheduleStatus::Expired;
        }
        action.updated_at = now;
        self.store.update_action(&action).await?;

        let run_number = self.store.list_runs(action.id).await?.len() as u64 + 1;
        let mut run = ScheduledRun::new(action.id, run_number, task_id, triggered_by);
        self.store.create_run(&run).await?;

        let options = TaskOptions {
            max_steps: action.task_max_steps,
            timeout_seconds: action.task_timeout_seconds,
            task_id: Some(task_id),
            ..Default::default()
        };
        if let Err(e) = self
            .executor
            .start(action.agent_id, action.goal.clone(), options, self.worker.clone())
            .await
        {
            if matches!(
                e,
                crate::domain::OrchestratorError::Task(TaskError::CapacityExhausted { .. })
            ) {
                tracing::warn!(action = %action.name, "dispatch deferred: executor at capacity");
            } else {
                tracing::error!(action = %action.name, error = %e, "dispatch failed");
            }
            // Roll back the schedule advance and close the stillborn run.
            (action.last_run_at, action.next_run_at, action.status) = previous;
            action.updated_at = Utc::now();
            self.store.update_action(&action).await?;
            run.terminal_status = Some("failed".to_string());
            run.finished_at = Some(Utc::now());
            run.duration_ms = Some(0);
            self.store.update_run(&run).await?;
            return Err(e);
        }

        self.publish_action_event(EventType::ScheduledActionTriggered, &action, Some(task_id))
            .await;
        self.publish_action_event(EventType::ScheduledActionStarted, &action, Some(task_id))
            .await;

        Ok(task_id)
    }

    /// Expire an action that passed its window or execution cap.
    async fn expire(&self, mut action: ScheduledAction) -> DomainResult<()> {
        action.status = ScheduleStatus::Expired;
        action.next_run_at = None;
        action.updated_at = Utc::now();
        self.store.update_action(&action).await?;
        self.publish_action_event(EventType::ScheduledActionExpired, &action, None)
            .await;
        Ok(())
    }

    /// Close out the run linked to a terminal background task.
    async fn handle_terminal(&self, event: &Event) -> Result<(), String> {
        let Some(task_id) = event.data_uuid("task_id") else {
            return Ok(());
        };
        let Some(mut run) = self
            .store
            .find_run_by_task(task_id)
            .await
            .map_err(|e| e.to_string())?
        else {
            return Ok(());
        };
        if run.is_terminal() {
            return Ok(());
        }

        let status = event.data_str("status").unwrap_or("failed").to_string();
        let succeeded = status == TaskStatus::Completed.as_str();
        let now = Utc::now();
        run.terminal_status = Some(status.clone());
        run.finished_at = Some(now);
        run.duration_ms = Some(
            now.signed_duration_since(run.triggered_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.store.update_run(&run).await.map_err(|e| e.to_string())?;

        let Some(mut action) = self
            .store
            .get_action(run.action_id)
            .await
            .map_err(|e| e.to_string())?
        else {
            return Ok(());
        };

        action.execution_count += 1;
        if succeeded {
            action.retry_count = 0;
            self.publish_action_event(EventType::ScheduledActionCompleted, &action, Some(task_id))
                .await;
        } else {
            self.publish_action_event(EventType::ScheduledActionFailed, &action, Some(task_id))
                .await;
            if action.retry_on_failure
                && action.retry_count < action.max_retries
                && action.status == ScheduleStatus::Active
            {
                let delay = ScheduledAction::retry_delay_seconds(action.retry_count);
                action.retry_count += 1;
                action.next_run_at = Some(now + chrono::Duration::seconds(delay as i64));
                tracing::info!(
                    action = %action.name,
                    attempt = action.retry_count,
                    delay_secs = delay,
                    "scheduling failure retry"
                );
            }
        }

        if action.status == ScheduleStatus::Active && action.is_exhausted(now) {
            action.updated_at = now;
            self.store
                .update_action(&action)
                .await
                .map_err(|e| e.to_string())?;
            return self.expire(action).await.map_err(|e| e.to_string());
        }

        action.updated_at = now;
        self.store
            .update_action(&action)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn publish_action_event(
        &self,
        event_type: EventType,
        action: &ScheduledAction,
        task_id: Option<Uuid>,
    ) {
        let mut data = json!({
            "action_id": action.id.to_string(),
            "name": action.name,
            "schedule_type": action.spec.as_str(),
            "execution_count": action.execution_count,
        });
        if let Some(id) = task_id {
            data["task_id"] = json!(id.to_string());
        }
        self.bus
            .publish(Event::new(event_type, data).with_agent(action.agent_id))
            .await;
    }
}

/// Closes runs when their background task reaches a terminal state.
struct TerminalHandler {
    core: Arc<Core>,
}

#[async_trait]
impl EventHandler for TerminalHandler {
    async fn handle(&self, event: &Event) -> Result<(), String> {
        self.core.handle_terminal(event).await
    }
}

/// Dispatches one event-triggered action when its trigger fires.
struct TriggerHandler {
    core: Arc<Core>,
    action_id: Uuid,
}

#[async_trait]
impl EventHandler for TriggerHandler {
    async fn handle(&self, _event: &Event) -> Result<(), String> {
        let action = match self.core.store.get_action(self.action_id).await {
            Ok(Some(action)) => action,
            Ok(None) => return Ok(()),
            Err(e) => return Err(e.to_string()),
        };
        if action.status != ScheduleStatus::Active {
            return Ok(());
        }
        let now = Utc::now();
        if action.before_window(now) {
            return Ok(());
        }
        if action.is_exhausted(now) {
            return self
                .core
                .expire(action)
                .await
                .map_err(|e| e.to_string());
        }
        if !action.allow_concurrent
            && self
                .core
                .store
                .has_open_run(action.id)
                .await
                .map_err(|e| e.to_string())?
        {
            return Ok(());
        }
        let _ = self.core.dispatch(action, TriggeredBy::Event).await;
        Ok(())
    }
}

/// Cron/interval/once/event dispatcher over the background executor.
pub struct Scheduler {
    core: Arc<Core>,
    running: Arc<AtomicBool>,
    /// action id -> trigger subscription, for event-typed actions.
    trigger_subs: Mutex<HashMap<Uuid, SubscriptionId>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        executor: Arc<BackgroundExecutor>,
        worker: Arc<dyn Worker>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                store,
                bus,
                executor,
                worker,
                config,
            }),
            running: Arc::new(AtomicBool::new(false)),
            trigger_subs: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the terminal-event subscriptions and event triggers, and
    /// reconcile runs left open by a previous process. Call before
    /// `start`.
    pub async fn initialize(&self) -> DomainResult<()> {
        let handler = Arc::new(TerminalHandler {
            core: self.core.clone(),
        });
        self.core
            .bus
            .subscribe_many(&EventType::BACKGROUND_TASK_TERMINAL, handler)
            .await;

        for action in self.core.store.list_event_actions().await? {
            self.subscribe_trigger(&action).await;
        }

        self.recover_open_runs().await?;
        Ok(())
    }

    /// Validate and persist a new action; event-typed actions get their
    /// trigger subscription immediately.
    pub async fn create_action(&self, action: ScheduledAction) -> DomainResult<Uuid> {
        if let ScheduleSpec::Interval { interval_seconds } = action.spec {
            if interval_seconds < self.core.config.min_interval_seconds {
                return Err(ScheduleError::IntervalTooShort(interval_seconds).into());
            }
        }
        action.spec.validate(Utc::now())?;

        let id = action.id;
        self.core.store.create_action(&action).await?;
        if action.event_trigger().is_some() {
            self.subscribe_trigger(&action).await;
        }
        Ok(id)
    }

    /// Pause an active action.
    pub async fn pause_action(&self, id: Uuid) -> DomainResult<()> {
        let mut action = self.get_action(id).await?;
        if action.status != ScheduleStatus::Active {
            return Err(ScheduleError::WrongStatus {
                id,
                expected: ScheduleStatus::Active.as_str().to_string(),
                actual: action.status.as_str().to_string(),
            }
            .into());
        }
        action.status = ScheduleStatus::Paused;
        action.updated_at = Utc::now();
        self.core.store.update_action(&action).await?;
        self.core
            .publish_action_event(EventType::ScheduledActionPaused, &action, None)
            .await;
        Ok(())
    }

    /// Resume a paused action, reseeding next_run_at for clock-driven
    /// specs.
    pub async fn resume_action(&self, id: Uuid) -> DomainResult<()> {
        let mut action = self.get_action(id).await?;
        if action.status != ScheduleStatus::Paused {
            return Err(ScheduleError::WrongStatus {
                id,
                expected: ScheduleStatus::Paused.as_str().to_string(),
                actual: action.status.as_str().to_string(),
            }
            .into());
        }
        let now = Utc::now();
        action.status = ScheduleStatus::Active;
        if action.next_run_at.is_none() {
            action.next_run_at = action.next_fire_after(now);
        }
        action.updated_at = now;
        self.core.store.update_action(&action).await?;
        self.core
            .publish_action_event(EventType::ScheduledActionResumed, &action, None)
            .await;
        Ok(())
    }

    /// Delete an action and drop its trigger subscription.
    pub async fn delete_action(&self, id: Uuid) -> DomainResult<()> {
        if let Some(sub) = self.trigger_subs.lock().await.remove(&id) {
            self.core.bus.unsubscribe(sub).await;
        }
        self.core.store.delete_action(id).await?;
        Ok(())
    }

    /// Dispatch immediately, recording `triggered_by = manual`. The
    /// concurrency gate still applies.
    pub async fn trigger_now(&self, id: Uuid) -> DomainResult<Uuid> {
        let action = self.get_action(id).await?;
        if !action.allow_concurrent && self.core.store.has_open_run(id).await? {
            return Err(crate::domain::OrchestratorError::Precondition(format!(
                "action '{}' has a run in flight",
                action.name
            )));
        }
        self.core.dispatch(action, TriggeredBy::Manual).await
    }

    /// Start the tick loop.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let core = self.core.clone();
        let running = self.running.clone();
        let tick = Duration::from_secs(core.config.tick_seconds.max(1));

        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(tick).await;
                if let Err(e) = tick_once(&core, Utc::now()).await {
                    tracing::error!(error = %e, "scheduler tick failed");
                }
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// One tick, exposed for deterministic tests.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> DomainResult<()> {
        tick_once(&self.core, now).await
    }

    async fn get_action(&self, id: Uuid) -> DomainResult<ScheduledAction> {
        self.core
            .store
            .get_action(id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(id).into())
    }

    async fn subscribe_trigger(&self, action: &ScheduledAction) {
        let Some(event_name) = action.event_trigger() else {
            return;
        };
        let Some(event_type) = EventType::from_str(event_name) else {
            tracing::warn!(
                action = %action.name,
                event = event_name,
                "unknown trigger event name; action will never fire"
            );
            return;
        };
        let handler = Arc::new(TriggerHandler {
            core: self.core.clone(),
            action_id: action.id,
        });
        let sub = self.core.bus.subscribe(event_type, handler, None).await;
        self.trigger_subs.lock().await.insert(action.id, sub);
    }

    /// Reconcile run rows left open by a crash: tasks the executor can
    /// still drive are left to its recovery; vanished or terminal tasks
    /// close their runs here.
    async fn recover_open_runs(&self) -> DomainResult<usize> {
        let open = self.core.store.list_open_runs().await?;
        let mut closed = 0;
        for mut run in open {
            let task = self.core.store.get_task(run.task_id).await?;
            let terminal = match task {
                Some(task) if !task.status.is_terminal() => continue,
                Some(task) => task.status.as_str().to_string(),
                None => TaskStatus::Failed.as_str().to_string(),
            };
            let now = Utc::now();
            run.terminal_status = Some(terminal);
            run.finished_at = Some(now);
            run.duration_ms = Some(
                now.signed_duration_since(run.triggered_at)
                    .num_milliseconds()
                    .max(0) as u64,
            );
            self.core.store.update_run(&run).await?;
            closed += 1;
        }
        Ok(closed)
    }
}

/// One pass over due actions, ascending by next_run_at.
async fn tick_once(core: &Arc<Core>, now: DateTime<Utc>) -> DomainResult<()> {
    let due = core.store.list_due_actions(now).await?;
    for action in due {
        if action.before_window(now) {
            continue;
        }
        if action.is_exhausted(now) {
            core.expire(action).await?;
            continue;
        }
        if !action.allow_concurrent && core.store.has_open_run(action.id).await? {
            // Leave next_run_at untouched: dispatch happens on the first
            // tick after the open run terminates.
            continue;
        }
        let _ = core.dispatch(action, TriggeredBy::Scheduler).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::ExecutorConfig;
    use crate::domain::ports::ScriptedWorker;
    use crate::infrastructure::memstore::MemStore;
    use crate::domain::ports::store::{ScheduleStore, TaskStore};

    struct Fixture {
        scheduler: Scheduler,
        store: Arc<MemStore>,
        bus: Arc<EventBus>,
    }

    fn fixture_with(worker: Arc<ScriptedWorker>) -> Fixture {
        let store = MemStore::shared();
        let bus = Arc::new(EventBus::new(1000));
        let executor = Arc::new(BackgroundExecutor::new(
            store.clone(),
            bus.clone(),
            ExecutorConfig::default(),
        ));
        let scheduler = Scheduler::new(
            store.clone(),
            bus.clone(),
            executor,
            worker,
            SchedulerConfig::default(),
        );
        Fixture {
            scheduler,
            store,
            bus,
        }
    }

    fn interval_action(secs: u64) -> ScheduledAction {
        ScheduledAction::new(
            Uuid::new_v4(),
            format!("every-{secs}s-{}", Uuid::new_v4()),
            "do the rounds",
            ScheduleSpec::Interval {
                interval_seconds: secs,
            },
        )
        .unwrap()
        .with_task_bounds(2, 60)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    #[tokio::test]
    async fn test_interval_below_floor_rejected() {
        let f = fixture_with(Arc::new(ScriptedWorker::always("x [COMPLETE]")));
        let mut action = interval_action(120);
        action.spec = ScheduleSpec::Interval {
            interval_seconds: 59,
        };
        let err = f.scheduler.create_action(action).await;
        assert!(matches!(
            err,
            Err(crate::domain::OrchestratorError::Schedule(
                ScheduleError::IntervalTooShort(59)
            ))
        ));
    }

    #[tokio::test]
    async fn test_due_action_dispatches_and_reschedules() {
        let f = fixture_with(Arc::new(ScriptedWorker::always("done [COMPLETE]")));
        f.scheduler.initialize().await.unwrap();

        let mut action = interval_action(60);
        action.next_run_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let id = f.scheduler.create_action(action).await.unwrap();

        let now = Utc::now();
        f.scheduler.tick_at(now).await.unwrap();

        let runs = f.store.list_runs(id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].triggered_by, TriggeredBy::Scheduler);

        let updated = f.store.get_action(id).await.unwrap().unwrap();
        assert!(updated.last_run_at.is_some());
        assert!(updated.next_run_at.unwrap() > now);

        // Terminal event closes the run and bumps execution_count.
        settle().await;
        let updated = f.store.get_action(id).await.unwrap().unwrap();
        assert_eq!(updated.execution_count, 1);
        let runs = f.store.list_runs(id).await.unwrap();
        assert!(runs[0].is_terminal());
    }

    #[tokio::test]
    async fn test_non_concurrent_gate_skips_while_run_open() {
        // Worker that never completes keeps the first run open.
        let worker =
            Arc::new(ScriptedWorker::always("grinding").with_call_delay(Duration::from_millis(20)));
        let f = fixture_with(worker);
        f.scheduler.initialize().await.unwrap();

        let mut action = interval_action(60);
        action.task_max_steps = Some(10_000);
        action.task_timeout_seconds = Some(600);
        action.next_run_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let id = f.scheduler.create_action(action).await.unwrap();

        f.scheduler.tick_at(Utc::now()).await.unwrap();
        assert_eq!(f.store.list_runs(id).await.unwrap().len(), 1);

        // Force the schedule due again; the open run gates dispatch.
        let mut action = f.store.get_action(id).await.unwrap().unwrap();
        action.next_run_at = Some(Utc::now() - chrono::Duration::seconds(1));
        f.store.update_action(&action).await.unwrap();

        f.scheduler.tick_at(Utc::now()).await.unwrap();
        f.scheduler.tick_at(Utc::now()).await.unwrap();
        assert_eq!(f.store.list_runs(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_by_max_executions() {
        let f = fixture_with(Arc::new(ScriptedWorker::always("x [COMPLETE]")));
        f.scheduler.initialize().await.unwrap();

        let mut action = interval_action(60).with_max_executions(1);
        action.next_run_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let id = f.scheduler.create_action(action).await.unwrap();

        f.scheduler.tick_at(Utc::now()).await.unwrap();
        settle().await;

        let action = f.store.get_action(id).await.unwrap().unwrap();
        assert_eq!(action.execution_count, 1);
        assert_eq!(action.status, ScheduleStatus::Expired);
    }

    #[tokio::test]
    async fn test_once_expires_after_dispatch() {
        let f = fixture_with(Arc::new(ScriptedWorker::always("x [COMPLETE]")));
        f.scheduler.initialize().await.unwrap();

        let mut action = ScheduledAction::new(
            Uuid::new_v4(),
            "one-shot",
            "fire once",
            ScheduleSpec::Once {
                fire_at: Utc::now() + chrono::Duration::hours(1),
            },
        )
        .unwrap()
        .with_task_bounds(2, 60);
        // Simulate the fire time arriving.
        action.next_run_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let id = f.scheduler.create_action(action).await.unwrap();

        f.scheduler.tick_at(Utc::now()).await.unwrap();
        let action = f.store.get_action(id).await.unwrap().unwrap();
        assert_eq!(action.status, ScheduleStatus::Expired);
        assert!(action.next_run_at.is_none());
        assert_eq!(f.store.list_runs(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_event_triggered_dispatch() {
        let f = fixture_with(Arc::new(ScriptedWorker::always("x [COMPLETE]")));
        f.scheduler.initialize().await.unwrap();

        let action = ScheduledAction::new(
            Uuid::new_v4(),
            "on-memory-created",
            "react to memory",
            ScheduleSpec::Event {
                event_name: "memory.created".into(),
            },
        )
        .unwrap()
        .with_task_bounds(2, 60);
        let id = f.scheduler.create_action(action).await.unwrap();

        f.bus
            .publish(Event::new(EventType::MemoryCreated, json!({})))
            .await;
        settle().await;

        let runs = f.store.list_runs(id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].triggered_by, TriggeredBy::Event);

        // Unrelated events do not dispatch.
        f.bus
            .publish(Event::new(EventType::TaskCreated, json!({})))
            .await;
        settle().await;
        assert_eq!(f.store.list_runs(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_retry_backoff() {
        // Worker that exhausts the 1-step budget without completing.
        let f = fixture_with(Arc::new(ScriptedWorker::always("not done")));
        f.scheduler.initialize().await.unwrap();

        let mut action = interval_action(3600).with_retry(true, 3);
        action.task_max_steps = Some(1);
        action.next_run_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let id = f.scheduler.create_action(action).await.unwrap();

        let before = Utc::now();
        f.scheduler.tick_at(before).await.unwrap();
        settle().await;

        let action = f.store.get_action(id).await.unwrap().unwrap();
        assert_eq!(action.retry_count, 1);
        let next = action.next_run_at.unwrap();
        // First retry lands about a minute out, well before the hourly beat.
        let delta = next.signed_duration_since(before).num_seconds();
        assert!((50..=90).contains(&delta), "unexpected retry delay {delta}s");
    }

    #[tokio::test]
    async fn test_manual_trigger_records_source() {
        let f = fixture_with(Arc::new(ScriptedWorker::always("x [COMPLETE]")));
        f.scheduler.initialize().await.unwrap();

        let action = interval_action(3600);
        let id = f.scheduler.create_action(action).await.unwrap();

        f.scheduler.trigger_now(id).await.unwrap();
        let runs = f.store.list_runs(id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].triggered_by, TriggeredBy::Manual);
    }

    #[tokio::test]
    async fn test_pause_resume_action() {
        let f = fixture_with(Arc::new(ScriptedWorker::always("x [COMPLETE]")));
        let action = interval_action(60);
        let id = f.scheduler.create_action(action).await.unwrap();

        f.scheduler.pause_action(id).await.unwrap();
        let paused = f.store.get_action(id).await.unwrap().unwrap();
        assert_eq!(paused.status, ScheduleStatus::Paused);

        // Paused actions are not due.
        let mut due_check = f.store.get_action(id).await.unwrap().unwrap();
        due_check.next_run_at = Some(Utc::now() - chrono::Duration::seconds(1));
        f.store.update_action(&due_check).await.unwrap();
        f.scheduler.tick_at(Utc::now()).await.unwrap();
        assert!(f.store.list_runs(id).await.unwrap().is_empty());

        f.scheduler.resume_action(id).await.unwrap();
        let resumed = f.store.get_action(id).await.unwrap().unwrap();
        assert_eq!(resumed.status, ScheduleStatus::Active);
    }

    #[tokio::test]
    async fn test_recovery_closes_orphan_runs() {
        let f = fixture_with(Arc::new(ScriptedWorker::always("x [COMPLETE]")));

        let action = interval_action(60);
        let action_id = action.id;
        f.store.create_action(&action).await.unwrap();

        // Run pointing at a task that no longer exists.
        let orphan = ScheduledRun::new(action_id, 1, Uuid::new_v4(), TriggeredBy::Scheduler);
        f.store.create_run(&orphan).await.unwrap();

        // Run pointing at a task that finished while the process was down.
        let mut done_task =
            crate::domain::models::BackgroundTask::new(Uuid::new_v4(), "finished offline");
        done_task.transition_to(TaskStatus::Running).unwrap();
        done_task.transition_to(TaskStatus::Completed).unwrap();
        f.store.create_task(&done_task).await.unwrap();
        let finished = ScheduledRun::new(action_id, 2, done_task.id, TriggeredBy::Scheduler);
        f.store.create_run(&finished).await.unwrap();

        f.scheduler.initialize().await.unwrap();

        let runs = f.store.list_runs(action_id).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].terminal_status.as_deref(), Some("failed"));
        assert_eq!(runs[1].terminal_status.as_deref(), Some("completed"));
    }
}
