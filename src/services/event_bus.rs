//! In-process typed event bus.
//!
//! Typed pub/sub with filtered subscriptions, concurrent handler
//! delivery, and a bounded in-memory history. A faulting handler is
//! counted and logged, never retried, and never affects other handlers
//! or the publisher.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{Event, EventFilter, EventType};

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Trait for event subscribers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), String>;
}

/// Closure adapter for synchronous handlers.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> Result<(), String> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> Result<(), String> {
        (self.0)(event)
    }
}

struct Subscription {
    id: SubscriptionId,
    event_type: EventType,
    filter: Option<EventFilter>,
    handler: Arc<dyn EventHandler>,
}

/// Snapshot of bus counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventBusStats {
    pub published: u64,
    pub delivered: u64,
    pub handler_errors: u64,
    pub active_subscribers: usize,
    pub history_size: usize,
}

/// Central in-process event bus.
pub struct EventBus {
    subscribers: RwLock<HashMap<EventType, Vec<Arc<Subscription>>>>,
    history: Mutex<VecDeque<Event>>,
    history_capacity: usize,
    published: AtomicU64,
    delivered: AtomicU64,
    handler_errors: AtomicU64,
}

impl EventBus {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(history_capacity.min(1024))),
            history_capacity,
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
        }
    }

    /// Register a handler for one event type, optionally filtered.
    /// Multiple subscribers per type are allowed.
    pub async fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
        filter: Option<EventFilter>,
    ) -> SubscriptionId {
        let sub = Arc::new(Subscription {
            id: SubscriptionId::new(),
            event_type,
            filter,
            handler,
        });
        let id = sub.id;
        let mut map = self.subscribers.write().await;
        map.entry(event_type).or_default().push(sub);
        id
    }

    /// Register the same handler for several event types at once.
    /// Returns one handle per type, in order.
    pub async fn subscribe_many(
        &self,
        event_types: &[EventType],
        handler: Arc<dyn EventHandler>,
    ) -> Vec<SubscriptionId> {
        let mut ids = Vec::with_capacity(event_types.len());
        for t in event_types {
            ids.push(self.subscribe(*t, handler.clone(), None).await);
        }
        ids
    }

    /// Remove a subscription. Idempotent: unknown handles are a no-op.
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        let mut map = self.subscribers.write().await;
        for subs in map.values_mut() {
            subs.retain(|s| s.id != id);
        }
        map.retain(|_, subs| !subs.is_empty());
    }

    /// Deliver an event to every matching subscriber concurrently.
    /// Returns after best-effort delivery to all; handler errors and
    /// panics are counted and isolated.
    pub async fn publish(&self, event: Event) {
        self.published.fetch_add(1, Ordering::Relaxed);

        {
            let mut history = self.history.lock().expect("event history poisoned");
            if history.len() >= self.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let matching: Vec<Arc<Subscription>> = {
            let map = self.subscribers.read().await;
            map.get(&event.event_type)
                .map(|subs| {
                    subs.iter()
                        .filter(|s| s.filter.as_ref().is_none_or(|f| f.matches(&event)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        if matching.is_empty() {
            return;
        }

        let handles: Vec<_> = matching
            .into_iter()
            .map(|sub| {
                let ev = event.clone();
                tokio::spawn(async move { sub.handler.handle(&ev).await })
            })
            .collect();

        for result in join_all(handles).await {
            match result {
                Ok(Ok(())) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    self.handler_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(event_type = %event.event_type, error = %e, "event handler failed");
                }
                Err(join_err) => {
                    self.handler_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(event_type = %event.event_type, error = %join_err, "event handler panicked");
                }
            }
        }
    }

    /// Read recent events from the bounded history, newest last.
    pub fn history(
        &self,
        event_type: Option<EventType>,
        filter: Option<&EventFilter>,
        limit: Option<usize>,
    ) -> Vec<Event> {
        let history = self.history.lock().expect("event history poisoned");
        let iter = history
            .iter()
            .filter(|e| event_type.is_none_or(|t| e.event_type == t))
            .filter(|e| filter.is_none_or(|f| f.matches(e)));
        let matched: Vec<Event> = iter.cloned().collect();
        match limit {
            Some(n) if matched.len() > n => matched[matched.len() - n..].to_vec(),
            _ => matched,
        }
    }

    pub async fn stats(&self) -> EventBusStats {
        let active_subscribers = {
            let map = self.subscribers.read().await;
            map.values().map(Vec::len).sum()
        };
        let history_size = self.history.lock().expect("event history poisoned").len();
        EventBusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            active_subscribers,
            history_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn collector() -> (Arc<dyn EventHandler>, Arc<StdMutex<Vec<Event>>>) {
        let seen: Arc<StdMutex<Vec<Event>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = Arc::new(FnHandler(move |e: &Event| {
            sink.lock().unwrap().push(e.clone());
            Ok(())
        }));
        (handler, seen)
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers() {
        let bus = EventBus::new(100);
        let (handler, seen) = collector();
        bus.subscribe(EventType::TaskCreated, handler, None).await;

        bus.publish(Event::new(EventType::TaskCreated, json!({}))).await;
        bus.publish(Event::new(EventType::TaskFailed, json!({}))).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        let stats = bus.stats().await;
        assert_eq!(stats.published, 2);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn test_filter_narrows_delivery() {
        let bus = EventBus::new(100);
        let agent = Uuid::new_v4();
        let (handler, seen) = collector();
        bus.subscribe(
            EventType::MemoryCreated,
            handler,
            Some(EventFilter::new().agent(agent)),
        )
        .await;

        bus.publish(Event::new(EventType::MemoryCreated, json!({})).with_agent(agent))
            .await;
        bus.publish(Event::new(EventType::MemoryCreated, json!({})).with_agent(Uuid::new_v4()))
            .await;

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_faulting_handler_is_isolated() {
        let bus = EventBus::new(100);
        let (good, seen) = collector();
        let bad = Arc::new(FnHandler(|_: &Event| Err("boom".to_string())));

        bus.subscribe(EventType::SystemError, bad, None).await;
        bus.subscribe(EventType::SystemError, good, None).await;

        bus.publish(Event::new(EventType::SystemError, json!({}))).await;

        // The good handler saw the event despite the bad one failing.
        assert_eq!(seen.lock().unwrap().len(), 1);
        let stats = bus.stats().await;
        assert_eq!(stats.handler_errors, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new(100);
        let (handler, seen) = collector();
        let id = bus.subscribe(EventType::TaskCreated, handler, None).await;

        bus.unsubscribe(id).await;
        bus.unsubscribe(id).await;

        bus.publish(Event::new(EventType::TaskCreated, json!({}))).await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.stats().await.active_subscribers, 0);
    }

    #[tokio::test]
    async fn test_history_ring_evicts_oldest() {
        let bus = EventBus::new(3);
        for i in 0..5 {
            bus.publish(Event::new(EventType::TaskCreated, json!({ "i": i })))
                .await;
        }
        let history = bus.history(None, None, None);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].data["i"], 2);
        assert_eq!(history[2].data["i"], 4);
    }

    #[tokio::test]
    async fn test_history_filters_and_limit() {
        let bus = EventBus::new(100);
        for _ in 0..3 {
            bus.publish(Event::new(EventType::TaskCreated, json!({}))).await;
        }
        bus.publish(Event::new(EventType::TaskFailed, json!({}))).await;

        assert_eq!(bus.history(Some(EventType::TaskCreated), None, None).len(), 3);
        assert_eq!(bus.history(Some(EventType::TaskCreated), None, Some(2)).len(), 2);
        assert_eq!(bus.history(Some(EventType::TaskFailed), None, None).len(), 1);
    }

    #[tokio::test]
    async fn test_each_subscriber_invoked_exactly_once_per_publish() {
        let bus = EventBus::new(100);
        let counters: Vec<Arc<AtomicU64>> = (0..4).map(|_| Arc::new(AtomicU64::new(0))).collect();
        for counter in &counters {
            let c = counter.clone();
            bus.subscribe(
                EventType::ConversationMessage,
                Arc::new(FnHandler(move |_: &Event| {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
                None,
            )
            .await;
        }

        for _ in 0..10 {
            bus.publish(Event::new(EventType::ConversationMessage, json!({})))
                .await;
        }

        for counter in counters {
            assert_eq!(counter.load(Ordering::SeqCst), 10);
        }
    }
}
