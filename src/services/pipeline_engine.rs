//! Pipeline DAG executor.
//!
//! Drives one run of a validated pipeline graph: a dispatcher marks
//! nodes runnable once every predecessor is satisfied, spawns each
//! runnable node as its own task, and folds completions back into the
//! run's node-state map. Condition branches skip the untaken side,
//! parallel fan-outs join on their single convergence node, and every
//! node attempt passes through per-node retry and a per-node-type
//! circuit breaker. Cancellation and the run timeout are cooperative.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::domain::error::{DomainResult, PipelineError};
use crate::domain::models::config::PipelineConfig;
use crate::domain::models::{
    BranchLabel, Event, EventType, Node, NodeKind, NodeState, Pipeline, PipelineRun,
    PipelineStatus, RunStatus,
};
use crate::domain::ports::{ActionRegistry, Store, Worker, WorkerContext};
use crate::services::circuit_breaker::{BreakerConfig, BreakerRegistry};
use crate::services::event_bus::EventBus;

/// Per-node retry policy, read from node config with engine defaults.
#[derive(Debug, Clone)]
struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: u32,
}

impl RetryPolicy {
    fn from_config(node: &Node, defaults: &PipelineConfig) -> Self {
        let retry = node.config.get("retry");
        let get_u64 = |key: &str| retry.and_then(|r| r.get(key)).and_then(|v| v.as_u64());
        Self {
            max_attempts: get_u64("max_attempts")
                .map(|v| v as u32)
                .unwrap_or(defaults.node_default_max_attempts)
                .max(1),
            initial_backoff: Duration::from_millis(get_u64("initial_backoff_ms").unwrap_or(1000)),
            max_backoff: Duration::from_millis(get_u64("max_backoff_ms").unwrap_or(60_000)),
            multiplier: get_u64("multiplier").map(|v| v as u32).unwrap_or(2).max(1),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            delay = (delay * self.multiplier).min(self.max_backoff);
        }
        delay.min(self.max_backoff)
    }
}

/// DAG executor with retry, circuit breaking, cancellation, and
/// run-level timeouts.
pub struct PipelineEngine {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    worker: Arc<dyn Worker>,
    actions: Arc<ActionRegistry>,
    breakers: Arc<BreakerRegistry>,
    config: PipelineConfig,
    /// run id -> cooperative cancellation flag.
    cancels: Arc<RwLock<HashMap<Uuid, Arc<AtomicBool>>>>,
}

impl PipelineEngine {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        worker: Arc<dyn Worker>,
        actions: Arc<ActionRegistry>,
        config: PipelineConfig,
    ) -> Self {
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            reset_after: chrono::Duration::seconds(config.breaker_reset_after_seconds as i64),
        }));
        Self {
            store,
            bus,
            worker,
            actions,
            breakers,
            config,
            cancels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate and persist a pipeline definition. Topology errors and
    /// unknown action names are rejected here, not at run time.
    pub async fn create_pipeline(&self, mut pipeline: Pipeline) -> DomainResult<Uuid> {
        pipeline.validate()?;
        self.validate_node_configs(&pipeline)?;
        if pipeline.timeout_seconds == 0 {
            pipeline.timeout_seconds = self.config.run_default_timeout_seconds;
        }
        let id = pipeline.id;
        self.store.create_pipeline(&pipeline).await?;
        Ok(id)
    }

    /// Start one run of an active pipeline. Returns the run id; the run
    /// itself executes on a spawned dispatcher task.
    pub async fn start_run(
        &self,
        pipeline_id: Uuid,
        trigger_payload: serde_json::Value,
    ) -> DomainResult<Uuid> {
        let pipeline = self
            .store
            .get_pipeline(pipeline_id)
            .await?
            .ok_or(PipelineError::NotFound(pipeline_id))?;
        if pipeline.status != PipelineStatus::Active {
            return Err(PipelineError::NotActive(pipeline_id).into());
        }

        let run = PipelineRun::new(&pipeline, trigger_payload);
        let run_id = run.id;
        self.store.create_pipeline_run(&run).await?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancels.write().await.insert(run_id, cancel.clone());

        let ctx = RunCtx {
            store: self.store.clone(),
            bus: self.bus.clone(),
            worker: self.worker.clone(),
            actions: self.actions.clone(),
            breakers: self.breakers.clone(),
            config: self.config.clone(),
            cancel,
        };
        let cancels = self.cancels.clone();
        tokio::spawn(async move {
            drive_run(ctx, pipeline, run).await;
            cancels.write().await.remove(&run_id);
        });

        Ok(run_id)
    }

    /// Request cooperative cancellation of a run.
    pub async fn cancel(&self, run_id: Uuid) -> DomainResult<()> {
        if let Some(flag) = self.cancels.read().await.get(&run_id) {
            flag.store(true, Ordering::SeqCst);
            return Ok(());
        }
        // No live dispatcher: close the row directly if still open.
        let mut run = self
            .store
            .get_pipeline_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))?;
        if run.status.is_terminal() {
            return Err(crate::domain::OrchestratorError::Precondition(format!(
                "run {run_id} already {}",
                run.status.as_str()
            )));
        }
        run.status = RunStatus::Cancelled;
        run.finished_at = Some(Utc::now());
        self.store.update_pipeline_run(&run).await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: Uuid) -> DomainResult<PipelineRun> {
        self.store
            .get_pipeline_run(run_id)
            .await?
            .ok_or_else(|| PipelineError::RunNotFound(run_id).into())
    }

    fn validate_node_configs(&self, pipeline: &Pipeline) -> Result<(), PipelineError> {
        for node in &pipeline.nodes {
            match node.kind {
                NodeKind::Action => {
                    let name = node
                        .config
                        .get("action")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| PipelineError::BadNodeConfig {
                            node: node.id.clone(),
                            reason: "missing 'action' name".into(),
                        })?;
                    if !self.actions.contains(name) {
                        return Err(PipelineError::UnknownAction(name.to_string()));
                    }
                }
                NodeKind::Delay => {
                    if node
                        .config
                        .get("duration_seconds")
                        .and_then(|v| v.as_u64())
                        .is_none()
                    {
                        return Err(PipelineError::BadNodeConfig {
                            node: node.id.clone(),
                            reason: "missing 'duration_seconds'".into(),
                        });
                    }
                }
                NodeKind::Agent => {
                    if node.config.get("prompt").and_then(|v| v.as_str()).is_none() {
                        return Err(PipelineError::BadNodeConfig {
                            node: node.id.clone(),
                            reason: "missing 'prompt'".into(),
                        });
                    }
                }
                NodeKind::Trigger | NodeKind::Condition | NodeKind::Parallel => {}
            }
        }
        Ok(())
    }
}

struct RunCtx {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    worker: Arc<dyn Worker>,
    actions: Arc<ActionRegistry>,
    breakers: Arc<BreakerRegistry>,
    config: PipelineConfig,
    cancel: Arc<AtomicBool>,
}

enum NodeOutcome {
    Succeeded(serde_json::Value),
    Failed(String),
}

/// The dispatcher: owns the run's state map and serializes all mutation.
async fn drive_run(ctx: RunCtx, pipeline: Pipeline, mut run: PipelineRun) {
    run.status = RunStatus::Running;
    run.started_at = Some(Utc::now());
    if ctx.store.update_pipeline_run(&run).await.is_err() {
        tracing::error!(run_id = %run.id, "failed to persist run start");
        return;
    }
    publish_run_event(&ctx, EventType::PipelineRunStarted, &pipeline, &run).await;

    let deadline = tokio::time::Instant::now()
        + Duration::from_secs(pipeline.timeout_seconds.max(1));
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, NodeOutcome)>();
    let mut in_flight = 0usize;

    schedule_ready(&ctx, &pipeline, &mut run, &tx, &mut in_flight).await;

    let terminal = loop {
        if ctx.cancel.load(Ordering::SeqCst) {
            break RunStatus::Cancelled;
        }
        if run
            .node_states
            .values()
            .all(|s| s.is_terminal())
        {
            let failed = run.node_states.values().any(|s| *s == NodeState::Failed);
            break if failed {
                RunStatus::Failed
            } else {
                RunStatus::Succeeded
            };
        }
        if in_flight == 0 {
            // Nothing running and nothing became ready: a failed node is
            // stalling the graph under fail-fast.
            break RunStatus::Failed;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                break RunStatus::Timeout;
            }
            _ = tokio::time::sleep(Duration::from_millis(25)) => {
                // Re-check the cancel flag.
                continue;
            }
            received = rx.recv() => {
                let Some((node_id, outcome)) = received else {
                    break RunStatus::Failed;
                };
                in_flight -= 1;
                match outcome {
                    NodeOutcome::Succeeded(output) => {
                        run.node_states.insert(node_id.clone(), NodeState::Succeeded);
                        publish_node_event(&ctx, EventType::PipelineNodeSucceeded, &pipeline, &run, &node_id).await;

                        // Condition decisions prune the untaken branch.
                        if let Some(node) = pipeline.node(&node_id) {
                            if node.kind == NodeKind::Condition {
                                let decision = output
                                    .get("result")
                                    .and_then(|v| v.as_bool())
                                    .unwrap_or(false);
                                skip_untaken_branch(&ctx, &pipeline, &mut run, &node_id, decision).await;
                            }
                        }

                        run.context.insert(node_id, output);
                        let _ = ctx.store.update_pipeline_run(&run).await;

                        if ctx.cancel.load(Ordering::SeqCst) {
                            break RunStatus::Cancelled;
                        }
                        schedule_ready(&ctx, &pipeline, &mut run, &tx, &mut in_flight).await;
                    }
                    NodeOutcome::Failed(error) => {
                        run.node_states.insert(node_id.clone(), NodeState::Failed);
                        run.error = Some(format!("node '{node_id}' failed: {error}"));
                        publish_node_event(&ctx, EventType::PipelineNodeFailed, &pipeline, &run, &node_id).await;
                        let _ = ctx.store.update_pipeline_run(&run).await;
                        // Fail fast: stop feeding the graph.
                        break RunStatus::Failed;
                    }
                }
            }
        }
    };

    // Wait briefly for in-flight nodes to observe cancellation, then
    // mark everything unfinished as skipped.
    if in_flight > 0 {
        ctx.cancel.store(true, Ordering::SeqCst);
        let drain_deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while in_flight > 0 {
            match tokio::time::timeout_at(drain_deadline, rx.recv()).await {
                Ok(Some((node_id, outcome))) => {
                    in_flight -= 1;
                    let state = match outcome {
                        NodeOutcome::Succeeded(output) => {
                            run.context.insert(node_id.clone(), output);
                            NodeState::Succeeded
                        }
                        NodeOutcome::Failed(_) => NodeState::Failed,
                    };
                    run.node_states.insert(node_id, state);
                }
                _ => break,
            }
        }
    }

    for node in &pipeline.nodes {
        let state = run.node_states.get(&node.id).copied();
        if matches!(state, Some(NodeState::Pending) | Some(NodeState::Running)) {
            run.node_states.insert(node.id.clone(), NodeState::Skipped);
            publish_node_event(&ctx, EventType::PipelineNodeSkipped, &pipeline, &run, &node.id)
                .await;
        }
    }

    run.status = terminal;
    run.finished_at = Some(Utc::now());
    if let Err(e) = ctx.store.update_pipeline_run(&run).await {
        tracing::error!(run_id = %run.id, error = %e, "failed to persist terminal run state");
        return;
    }

    let event_type = match terminal {
        RunStatus::Succeeded => EventType::PipelineRunSucceeded,
        RunStatus::Cancelled => EventType::PipelineRunCancelled,
        RunStatus::Timeout => EventType::PipelineRunTimeout,
        _ => EventType::PipelineRunFailed,
    };
    publish_run_event(&ctx, event_type, &pipeline, &run).await;

    // Fold the terminal run into the pipeline's aggregate counters.
    if let Ok(Some(mut stored)) = ctx.store.get_pipeline(pipeline.id).await {
        stored
            .counters
            .record_run(terminal == RunStatus::Succeeded, run.duration_ms().unwrap_or(0));
        stored.updated_at = Utc::now();
        if let Err(e) = ctx.store.update_pipeline(&stored).await {
            tracing::warn!(pipeline_id = %pipeline.id, error = %e, "counter update failed");
        }
    }
}

/// Mark newly-ready nodes and spawn them. A node is ready when every
/// predecessor is terminal and satisfied; a node whose predecessors all
/// skipped is itself skipped, which can cascade.
async fn schedule_ready(
    ctx: &RunCtx,
    pipeline: &Pipeline,
    run: &mut PipelineRun,
    tx: &mpsc::UnboundedSender<(String, NodeOutcome)>,
    in_flight: &mut usize,
) {
    loop {
        let mut to_skip: Vec<String> = Vec::new();
        let mut to_run: Vec<String> = Vec::new();

        for node in &pipeline.nodes {
            if run.node_states.get(&node.id) != Some(&NodeState::Pending) {
                continue;
            }
            let pred_states: Vec<NodeState> = pipeline
                .edges_to(&node.id)
                .filter_map(|e| run.node_states.get(&e.from_node).copied())
                .collect();

            if pred_states.is_empty() {
                // Only the trigger has no predecessors.
                to_run.push(node.id.clone());
                continue;
            }
            if !pred_states.iter().all(|s| s.is_terminal()) {
                continue;
            }
            if pred_states.iter().any(|s| *s == NodeState::Failed) {
                // Fail-fast teardown handles the rest of the graph.
                continue;
            }
            if pred_states.iter().all(|s| *s == NodeState::Skipped) {
                to_skip.push(node.id.clone());
            } else {
                to_run.push(node.id.clone());
            }
        }

        for node_id in &to_skip {
            run.node_states.insert(node_id.clone(), NodeState::Skipped);
            publish_node_event(ctx, EventType::PipelineNodeSkipped, pipeline, run, node_id).await;
        }

        for node_id in &to_run {
            run.node_states.insert(node_id.clone(), NodeState::Running);
            publish_node_event(ctx, EventType::PipelineNodeStarted, pipeline, run, node_id).await;

            let node = pipeline
                .node(node_id)
                .expect("scheduled node exists in pipeline")
                .clone();
            let task = NodeTask {
                worker: ctx.worker.clone(),
                actions: ctx.actions.clone(),
                breakers: ctx.breakers.clone(),
                policy: RetryPolicy::from_config(&node, &ctx.config),
                cancel: ctx.cancel.clone(),
                node,
                context: run.context.clone(),
                trigger_payload: run.trigger_payload.clone(),
            };
            let tx = tx.clone();
            *in_flight += 1;
            tokio::spawn(async move {
                let node_id = task.node.id.clone();
                let outcome = task.run().await;
                let _ = tx.send((node_id, outcome));
            });
        }

        // Skips may have unlocked further nodes; loop to fixpoint.
        if to_skip.is_empty() {
            break;
        }
    }

    let _ = ctx.store.update_pipeline_run(run).await;
}

/// After a condition decides, its untaken direct successor is skipped;
/// cascade skipping is handled by `schedule_ready`.
async fn skip_untaken_branch(
    ctx: &RunCtx,
    pipeline: &Pipeline,
    run: &mut PipelineRun,
    condition_id: &str,
    decision: bool,
) {
    let untaken: Vec<String> = pipeline
        .edges_from(condition_id)
        .filter(|e| match e.branch {
            Some(BranchLabel::True) => !decision,
            Some(BranchLabel::False) => decision,
            None => false,
        })
        .map(|e| e.to_node.clone())
        .collect();

    for node_id in untaken {
        if run.node_states.get(&node_id) == Some(&NodeState::Pending) {
            run.node_states.insert(node_id.clone(), NodeState::Skipped);
            publish_node_event(ctx, EventType::PipelineNodeSkipped, pipeline, run, &node_id).await;
        }
    }
}

/// One node's execution: breaker gate, attempt loop with backoff, and
/// cooperative cancellation between attempts.
struct NodeTask {
    worker: Arc<dyn Worker>,
    actions: Arc<ActionRegistry>,
    breakers: Arc<BreakerRegistry>,
    policy: RetryPolicy,
    cancel: Arc<AtomicBool>,
    node: Node,
    context: serde_json::Map<String, serde_json::Value>,
    trigger_payload: serde_json::Value,
}

impl NodeTask {
    async fn run(self) -> NodeOutcome {
        let breaker_key = self.node.kind.as_str().to_string();

        for attempt in 1..=self.policy.max_attempts {
            if self.cancel.load(Ordering::SeqCst) {
                return NodeOutcome::Failed("cancelled".to_string());
            }
            if !self.breakers.allows(&breaker_key).await {
                return NodeOutcome::Failed(format!(
                    "circuit breaker open for '{breaker_key}'"
                ));
            }

            match self.attempt_once().await {
                Ok(value) => {
                    self.breakers.record_success(&breaker_key).await;
                    return NodeOutcome::Succeeded(value);
                }
                Err(error) => {
                    self.breakers.record_failure(&breaker_key).await;
                    tracing::warn!(
                        node = %self.node.id,
                        attempt,
                        max = self.policy.max_attempts,
                        error = %error,
                        "node attempt failed"
                    );
                    if attempt == self.policy.max_attempts {
                        return NodeOutcome::Failed(error);
                    }
                    let backoff = self.policy.backoff_for(attempt);
                    if !self.sleep_cancellable(backoff).await {
                        return NodeOutcome::Failed("cancelled".to_string());
                    }
                }
            }
        }
        NodeOutcome::Failed("retries exhausted".to_string())
    }

    async fn attempt_once(&self) -> Result<serde_json::Value, String> {
        match self.node.kind {
            NodeKind::Trigger => Ok(self.trigger_payload.clone()),
            NodeKind::Parallel => Ok(serde_json::Value::Null),
            NodeKind::Delay => {
                let secs = self
                    .node
                    .config
                    .get("duration_seconds")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                if !self.sleep_cancellable(Duration::from_secs(secs)).await {
                    return Err("cancelled".to_string());
                }
                Ok(serde_json::Value::Null)
            }
            NodeKind::Condition => {
                let result = self.evaluate_predicate();
                Ok(json!({ "result": result }))
            }
            NodeKind::Agent => {
                let prompt = self
                    .node
                    .config
                    .get("prompt")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "agent node missing prompt".to_string())?;
                let rendered = self.render_prompt(prompt);
                let mode = self
                    .node
                    .config
                    .get("mode")
                    .and_then(|v| v.as_str())
                    .unwrap_or("chat");
                let output = if mode == "action" {
                    self.worker
                        .execute_action(&rendered, &rendered)
                        .await
                        .map_err(|e| e.to_string())?
                        .output
                } else {
                    self.worker
                        .chat(&rendered, &WorkerContext::default())
                        .await
                        .map_err(|e| e.to_string())?
                };
                Ok(json!({ "output": output }))
            }
            NodeKind::Action => {
                let name = self
                    .node
                    .config
                    .get("action")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "action node missing name".to_string())?;
                let handler = self
                    .actions
                    .get(name)
                    .ok_or_else(|| format!("unknown action '{name}'"))?;
                let params = self
                    .node
                    .config
                    .get("params")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                handler.invoke(&params, &self.context).await
            }
        }
    }

    /// v1 predicate: compare a dotted path in {trigger, context} against
    /// an expected value, or a literal `always`.
    fn evaluate_predicate(&self) -> bool {
        if let Some(always) = self.node.config.get("always").and_then(|v| v.as_bool()) {
            return always;
        }
        let Some(path) = self.node.config.get("path").and_then(|v| v.as_str()) else {
            return false;
        };
        let expected = self.node.config.get("equals");

        let mut current: Option<&serde_json::Value> = None;
        for (i, part) in path.split('.').enumerate() {
            current = if i == 0 {
                if part == "trigger" {
                    Some(&self.trigger_payload)
                } else {
                    self.context.get(part)
                }
            } else {
                current.and_then(|v| v.get(part))
            };
        }
        match (current, expected) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(actual), None) => actual.as_bool().unwrap_or(!actual.is_null()),
            (None, _) => false,
        }
    }

    /// Substitute `{{node_id}}` references with prior node outputs.
    fn render_prompt(&self, template: &str) -> String {
        let mut rendered = template.to_string();
        for (node_id, output) in &self.context {
            let placeholder = format!("{{{{{node_id}}}}}");
            if rendered.contains(&placeholder) {
                let text = output
                    .get("output")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| output.to_string());
                rendered = rendered.replace(&placeholder, &text);
            }
        }
        rendered
    }

    /// Sleep in short slices so cancellation is observed promptly.
    /// Returns false when cancelled mid-sleep.
    async fn sleep_cancellable(&self, total: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + total;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            let slice = (deadline - now).min(Duration::from_millis(50));
            tokio::time::sleep(slice).await;
        }
    }
}

async fn publish_run_event(
    ctx: &RunCtx,
    event_type: EventType,
    pipeline: &Pipeline,
    run: &PipelineRun,
) {
    ctx.bus
        .publish(Event::new(
            event_type,
            json!({
                "pipeline_id": pipeline.id.to_string(),
                "pipeline_name": pipeline.name,
                "run_id": run.id.to_string(),
                "status": run.status.as_str(),
                "error": run.error,
            }),
        ))
        .await;
}

async fn publish_node_event(
    ctx: &RunCtx,
    event_type: EventType,
    pipeline: &Pipeline,
    run: &PipelineRun,
    node_id: &str,
) {
    ctx.bus
        .publish(Event::new(
            event_type,
            json!({
                "pipeline_id": pipeline.id.to_string(),
                "run_id": run.id.to_string(),
                "node_id": node_id,
            }),
        ))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Edge;
    use crate::domain::ports::store::PipelineStore;
    use crate::domain::ports::{FnAction, ScriptedWorker};
    use crate::infrastructure::memstore::MemStore;

    struct Fixture {
        engine: PipelineEngine,
        store: Arc<MemStore>,
    }

    fn fixture() -> Fixture {
        let store = MemStore::shared();
        let bus = Arc::new(EventBus::new(1000));
        let worker = Arc::new(ScriptedWorker::always("node output").with_chat_reply("chatted"));
        let mut actions = ActionRegistry::with_builtins();
        actions.register(
            "echo",
            Arc::new(FnAction(|params: &serde_json::Value, _ctx: &serde_json::Map<String, serde_json::Value>| {
                Ok(json!({ "echoed": params.clone() }))
            })),
        );
        let engine = PipelineEngine::new(
            store.clone(),
            bus,
            worker,
            Arc::new(actions),
            PipelineConfig::default(),
        );
        Fixture { engine, store }
    }

    fn active(mut pipeline: Pipeline) -> Pipeline {
        pipeline.status = PipelineStatus::Active;
        pipeline
    }

    async fn wait_run_terminal(store: &MemStore, run_id: Uuid) -> PipelineRun {
        for _ in 0..400 {
            if let Some(run) = store.get_pipeline_run(run_id).await.unwrap() {
                if run.status.is_terminal() {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run never reached a terminal state");
    }

    #[tokio::test]
    async fn test_linear_run_succeeds_in_order() {
        let f = fixture();
        let pipeline = active(Pipeline::new(
            "linear",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("think", NodeKind::Agent)
                    .with_config(json!({ "prompt": "summarize {{start}}" })),
                Node::new("notify", NodeKind::Action)
                    .with_config(json!({ "action": "echo", "params": {"done": true} })),
            ],
            vec![Edge::new("start", "think"), Edge::new("think", "notify")],
        ));
        let id = f.engine.create_pipeline(pipeline).await.unwrap();

        let run_id = f
            .engine
            .start_run(id, json!({ "input": "hello" }))
            .await
            .unwrap();
        let run = wait_run_terminal(&f.store, run_id).await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.node_states["start"], NodeState::Succeeded);
        assert_eq!(run.node_states["think"], NodeState::Succeeded);
        assert_eq!(run.node_states["notify"], NodeState::Succeeded);
        assert_eq!(run.context["start"]["input"], "hello");
        assert_eq!(run.context["think"]["output"], "chatted");
        assert_eq!(run.context["notify"]["echoed"]["done"], true);
    }

    #[tokio::test]
    async fn test_condition_skips_untaken_branch() {
        let f = fixture();
        // trigger -> condition -> (true: yes / false: no) -> join
        let pipeline = active(Pipeline::new(
            "branchy",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("check", NodeKind::Condition)
                    .with_config(json!({ "path": "trigger.flag", "equals": true })),
                Node::new("yes", NodeKind::Agent).with_config(json!({ "prompt": "took true" })),
                Node::new("no", NodeKind::Agent).with_config(json!({ "prompt": "took false" })),
                Node::new("join", NodeKind::Action)
                    .with_config(json!({ "action": "echo", "params": {} })),
            ],
            vec![
                Edge::new("start", "check"),
                Edge::branched("check", "yes", BranchLabel::True),
                Edge::branched("check", "no", BranchLabel::False),
                Edge::new("yes", "join"),
                Edge::new("no", "join"),
            ],
        ));
        let id = f.engine.create_pipeline(pipeline).await.unwrap();

        let run_id = f.engine.start_run(id, json!({ "flag": true })).await.unwrap();
        let run = wait_run_terminal(&f.store, run_id).await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.node_states["yes"], NodeState::Succeeded);
        assert_eq!(run.node_states["no"], NodeState::Skipped);
        assert_eq!(run.node_states["join"], NodeState::Succeeded);
    }

    #[tokio::test]
    async fn test_parallel_fans_out_and_joins() {
        let f = fixture();
        let pipeline = active(Pipeline::new(
            "fanout",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("fan", NodeKind::Parallel),
                Node::new("x", NodeKind::Agent).with_config(json!({ "prompt": "x work" })),
                Node::new("y", NodeKind::Agent).with_config(json!({ "prompt": "y work" })),
                Node::new("join", NodeKind::Action)
                    .with_config(json!({ "action": "echo", "params": {} })),
            ],
            vec![
                Edge::new("start", "fan"),
                Edge::new("fan", "x"),
                Edge::new("fan", "y"),
                Edge::new("x", "join"),
                Edge::new("y", "join"),
            ],
        ));
        let id = f.engine.create_pipeline(pipeline).await.unwrap();

        let run_id = f.engine.start_run(id, json!({})).await.unwrap();
        let run = wait_run_terminal(&f.store, run_id).await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.node_states["x"], NodeState::Succeeded);
        assert_eq!(run.node_states["y"], NodeState::Succeeded);
        assert_eq!(run.node_states["join"], NodeState::Succeeded);
    }

    #[tokio::test]
    async fn test_failing_node_fails_run_fast() {
        let mut actions = ActionRegistry::new();
        actions.register(
            "explode",
            Arc::new(FnAction(|_: &serde_json::Value, _ctx: &serde_json::Map<String, serde_json::Value>| {
                Err("kaboom".to_string())
            })),
        );
        let store = MemStore::shared();
        let bus = Arc::new(EventBus::new(100));
        let engine = PipelineEngine::new(
            store.clone(),
            bus,
            Arc::new(ScriptedWorker::always("x")),
            Arc::new(actions),
            PipelineConfig {
                node_default_max_attempts: 2,
                ..Default::default()
            },
        );

        let pipeline = active(Pipeline::new(
            "doomed",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("boom", NodeKind::Action)
                    .with_config(json!({ "action": "explode", "retry": {"initial_backoff_ms": 1} })),
                Node::new("after", NodeKind::Action)
                    .with_config(json!({ "action": "explode" })),
            ],
            vec![Edge::new("start", "boom"), Edge::new("boom", "after")],
        ));
        let id = engine.create_pipeline(pipeline).await.unwrap();

        let run_id = engine.start_run(id, json!({})).await.unwrap();
        let run = wait_run_terminal(&store, run_id).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.node_states["boom"], NodeState::Failed);
        assert_eq!(run.node_states["after"], NodeState::Skipped);
        assert!(run.error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_cancel_skips_unstarted_nodes() {
        let f = fixture();
        let pipeline = active(Pipeline::new(
            "slow",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("nap", NodeKind::Delay)
                    .with_config(json!({ "duration_seconds": 30 })),
                Node::new("after", NodeKind::Action)
                    .with_config(json!({ "action": "echo", "params": {} })),
            ],
            vec![Edge::new("start", "nap"), Edge::new("nap", "after")],
        ));
        let id = f.engine.create_pipeline(pipeline).await.unwrap();

        let run_id = f.engine.start_run(id, json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.engine.cancel(run_id).await.unwrap();

        let run = wait_run_terminal(&f.store, run_id).await;
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.node_states["after"], NodeState::Skipped);
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let f = fixture();
        let mut pipeline = active(Pipeline::new(
            "sleepy",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("nap", NodeKind::Delay)
                    .with_config(json!({ "duration_seconds": 60 })),
            ],
            vec![Edge::new("start", "nap")],
        ));
        pipeline.timeout_seconds = 1;
        let id = f.engine.create_pipeline(pipeline).await.unwrap();

        let run_id = f.engine.start_run(id, json!({})).await.unwrap();
        let run = wait_run_terminal(&f.store, run_id).await;
        assert_eq!(run.status, RunStatus::Timeout);
    }

    #[tokio::test]
    async fn test_unknown_action_rejected_at_create() {
        let f = fixture();
        let pipeline = active(Pipeline::new(
            "bad-action",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("ghost", NodeKind::Action)
                    .with_config(json!({ "action": "does_not_exist" })),
            ],
            vec![Edge::new("start", "ghost")],
        ));
        let err = f.engine.create_pipeline(pipeline).await;
        assert!(matches!(
            err,
            Err(crate::domain::OrchestratorError::Pipeline(
                PipelineError::UnknownAction(_)
            ))
        ));
    }

    #[tokio::test]
    async fn test_draft_pipeline_cannot_run() {
        let f = fixture();
        let pipeline = Pipeline::new(
            "draft",
            vec![Node::new("start", NodeKind::Trigger)],
            vec![],
        );
        let id = f.engine.create_pipeline(pipeline).await.unwrap();
        let err = f.engine.start_run(id, json!({})).await;
        assert!(matches!(
            err,
            Err(crate::domain::OrchestratorError::Pipeline(
                PipelineError::NotActive(_)
            ))
        ));
    }

    #[test]
    fn test_retry_backoff_growth() {
        let node = Node::new("n", NodeKind::Action).with_config(json!({
            "retry": {"max_attempts": 4, "initial_backoff_ms": 100, "max_backoff_ms": 350, "multiplier": 2}
        }));
        let policy = RetryPolicy::from_config(&node, &PipelineConfig::default());
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
    }
}
