//! Background executor integration scenarios: sentinel completion, step
//! budget exhaustion, and checkpointed crash recovery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use coterie::domain::models::{EventType, StepAction, TaskOptions, TaskStatus};
use coterie::domain::ports::store::TaskStore;
use coterie::domain::ports::{ActionOutcome, ScriptedWorker};

use common::{harness, restarted_executor, wait_task, wait_task_terminal};

#[tokio::test]
async fn sentinel_completion_produces_two_steps_and_one_event() {
    let h = harness();
    let worker = Arc::new(ScriptedWorker::scripted(vec![ActionOutcome::text(
        "4 [COMPLETE]",
    )]));

    let task_id = h
        .executor
        .start(
            uuid::Uuid::new_v4(),
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

    let task = wait_task_terminal(&h.store, task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.final_result.as_deref().unwrap().contains('4'));

    let steps = h.store.list_steps(task_id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].action, StepAction::Plan);
    assert_eq!(steps[1].action, StepAction::Execute);

    // Exactly one completion event, and the lifecycle in order.
    let completed = h
        .bus
        .history(Some(EventType::BackgroundTaskCompleted), None, None);
    assert_eq!(completed.len(), 1);
    let all = h.bus.history(None, None, None);
    let order: Vec<EventType> = all
        .iter()
        .map(|e| e.event_type)
        .filter(|t| {
            matches!(
                t,
                EventType::BackgroundTaskCreated
                    | EventType::BackgroundTaskStarted
                    | EventType::BackgroundTaskCompleted
            )
        })
        .collect();
    assert_eq!(
        order,
        vec![
            EventType::BackgroundTaskCreated,
            EventType::BackgroundTaskStarted,
            EventType::BackgroundTaskCompleted,
        ]
    );
}

#[tokio::test]
async fn step_limit_exhaustion_fails_with_message() {
    let h = harness();
    let worker = Arc::new(ScriptedWorker::always("keep going"));

    let task_id = h
        .executor
        .start(
            uuid::Uuid::new_v4(),
            "unreachable goal",
            TaskOptions {
                max_steps: Some(3),
                timeout_seconds: Some(60),
                ..Default::default()
            },
            worker,
        )
        .await
        .unwrap();

    let task = wait_task_terminal(&h.store, task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some("step limit exceeded"));

    let steps = h.store.list_steps(task_id).await.unwrap();
    let plans = steps.iter().filter(|s| s.action == StepAction::Plan).count();
    let executes = steps
        .iter()
        .filter(|s| s.action == StepAction::Execute)
        .count();
    assert_eq!((plans, executes), (3, 3));

    assert_eq!(
        h.bus
            .history(Some(EventType::BackgroundTaskFailed), None, None)
            .len(),
        1
    );
}

#[tokio::test]
async fn checkpoint_survives_simulated_crash() {
    let h = harness();
    let worker =
        Arc::new(ScriptedWorker::always("grinding").with_call_delay(Duration::from_millis(5)));

    let task_id = h
        .executor
        .start(
            uuid::Uuid::new_v4(),
            "long computation",
            TaskOptions {
                max_steps: Some(1000),
                timeout_seconds: Some(600),
                checkpoint_interval: Some(2),
                ..Default::default()
            },
            worker,
        )
        .await
        .unwrap();

    // Let several checkpoints land.
    wait_task(&h.store, task_id, |t| t.current_step >= 6).await;

    // Crash: zero-grace shutdown aborts the loop without a clean pause,
    // leaving the row in running state.
    h.executor.shutdown(Duration::ZERO).await;
    let crashed = h.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(crashed.status, TaskStatus::Running);
    let steps_at_crash = h.store.list_steps(task_id).await.unwrap();
    let step_at_crash = crashed.current_step;
    assert!(step_at_crash >= 6);
    assert!(crashed.checkpoint.is_some());

    // Restart: a fresh executor over the same store resumes the loop.
    let executor2 = restarted_executor(&h);
    let worker2 =
        Arc::new(ScriptedWorker::always("grinding").with_call_delay(Duration::from_millis(5)));
    let recovered = executor2.recover_tasks(worker2).await.unwrap();
    assert_eq!(recovered, 1);

    // Execution continues past the crash point.
    wait_task(&h.store, task_id, |t| t.current_step > step_at_crash).await;
    executor2.cancel(task_id).await.unwrap();
    wait_task_terminal(&h.store, task_id).await;

    // The step prefix recorded before the crash is intact, and step
    // numbers stay strictly increasing with no duplicates.
    let steps_after = h.store.list_steps(task_id).await.unwrap();
    assert!(steps_after.len() >= steps_at_crash.len());
    for (before, after) in steps_at_crash.iter().zip(steps_after.iter()) {
        assert_eq!(before.id, after.id);
        assert_eq!(before.step_number, after.step_number);
    }
    for pair in steps_after.windows(2) {
        assert!(pair[0].step_number < pair[1].step_number);
    }
}

#[tokio::test]
async fn pause_resume_preserves_checkpoint_and_history() {
    let h = harness();
    let worker =
        Arc::new(ScriptedWorker::always("stepping").with_call_delay(Duration::from_millis(5)));

    let task_id = h
        .executor
        .start(
            uuid::Uuid::new_v4(),
            "pausable work",
            TaskOptions {
                max_steps: Some(1000),
                timeout_seconds: Some(600),
                checkpoint_interval: Some(2),
                ..Default::default()
            },
            worker.clone(),
        )
        .await
        .unwrap();

    wait_task(&h.store, task_id, |t| t.current_step >= 2).await;

    h.executor.pause(task_id).await.unwrap();
    let paused = wait_task(&h.store, task_id, |t| t.status == TaskStatus::Paused).await;

    let steps_paused = h.store.list_steps(task_id).await.unwrap();
    let checkpoint_paused = paused.checkpoint.clone();

    // Pause alone changes nothing about progress or history.
    let still_paused = h.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(still_paused.current_step, paused.current_step);
    assert_eq!(still_paused.checkpoint, checkpoint_paused);
    assert_eq!(
        h.store.list_steps(task_id).await.unwrap().len(),
        steps_paused.len()
    );

    // Resumed execution continues from current_step + 1.
    h.executor.resume(task_id, worker).await.unwrap();
    wait_task(&h.store, task_id, |t| t.current_step > paused.current_step).await;
    h.executor.cancel(task_id).await.unwrap();
    wait_task_terminal(&h.store, task_id).await;

    let resumed_events = h
        .bus
        .history(Some(EventType::BackgroundTaskResumed), None, None);
    assert_eq!(resumed_events.len(), 1);
}
