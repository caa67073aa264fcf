//! Application aggregate root.
//!
//! Builds the object graph at startup and threads it through: bus, cache,
//! memory, executor, scheduler, pipeline engine, WebSocket hub. No
//! ambient globals; everything reachable from one `App` value. Also owns
//! startup recovery ordering and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::error::DomainResult;
use crate::domain::models::Config;
use crate::domain::ports::{ActionRegistry, SharedCache, Store, Worker};
use crate::services::{
    BackgroundExecutor, Cache, CircleService, EventBus, MemoryService, PipelineEngine, Scheduler,
    WsHub,
};

/// The wired orchestrator.
pub struct App {
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub cache: Arc<Cache>,
    pub memory: Arc<MemoryService>,
    pub circles: Arc<CircleService>,
    pub executor: Arc<BackgroundExecutor>,
    pub scheduler: Arc<Scheduler>,
    pub pipelines: Arc<PipelineEngine>,
    pub ws_hub: Arc<WsHub>,
    worker: Arc<dyn Worker>,
    scheduler_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl App {
    /// Construct and wire every component. Subscriptions (cache
    /// invalidation, WsHub forwarding) are registered here; recovery and
    /// loops start in `start`.
    pub async fn build(
        config: Config,
        store: Arc<dyn Store>,
        worker: Arc<dyn Worker>,
        shared_cache: Option<Arc<dyn SharedCache>>,
        actions: ActionRegistry,
    ) -> Self {
        let bus = Arc::new(EventBus::new(config.event_bus.history_capacity));

        let cache = Arc::new(Cache::new(config.cache.clone(), shared_cache));
        cache.subscribe_invalidation(&bus).await;

        let memory = Arc::new(MemoryService::new(
            store.clone(),
            worker.clone(),
            cache.clone(),
            bus.clone(),
        ));

        let circles = Arc::new(CircleService::new(
            store.clone(),
            bus.clone(),
            cache.clone(),
        ));

        let executor = Arc::new(
            BackgroundExecutor::new(store.clone(), bus.clone(), config.executor.clone())
                .with_context_provider(memory.clone()),
        );

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            bus.clone(),
            executor.clone(),
            worker.clone(),
            config.scheduler.clone(),
        ));

        let pipelines = Arc::new(PipelineEngine::new(
            store.clone(),
            bus.clone(),
            worker.clone(),
            Arc::new(actions),
            config.pipeline.clone(),
        ));

        let ws_hub = Arc::new(WsHub::new());
        ws_hub.subscribe_events(&bus).await;

        Self {
            config,
            bus,
            cache,
            memory,
            circles,
            executor,
            scheduler,
            pipelines,
            ws_hub,
            worker,
            scheduler_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Startup sequence: recover in-flight tasks, reconcile scheduled
    /// runs, wire event triggers, then start the tick loop.
    pub async fn start(&self) -> DomainResult<()> {
        let recovered = self.executor.recover_tasks(self.worker.clone()).await?;
        if recovered > 0 {
            tracing::info!(recovered, "resumed in-flight background tasks");
        }

        self.scheduler.initialize().await?;
        let handle = self.scheduler.start();
        *self.scheduler_handle.lock().await = Some(handle);
        tracing::info!("orchestrator started");
        Ok(())
    }

    /// Graceful shutdown: stop the scheduler, pause running task loops
    /// within the grace window, and let WsHub connections drain.
    pub async fn shutdown(&self, grace: Duration) {
        self.scheduler.stop();
        if let Some(handle) = self.scheduler_handle.lock().await.take() {
            handle.abort();
        }
        self.executor.shutdown(grace).await;
        tracing::info!("orchestrator stopped");
    }
}
