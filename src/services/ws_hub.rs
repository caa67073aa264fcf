//! WebSocket fan-out hub.
//!
//! Keeps the registry of connected observers and broadcasts a
//! whitelisted subset of bus events to all of them concurrently. A
//! client whose send fails is disconnected; the failure never blocks or
//! drops delivery for the others. Transport is abstracted behind
//! `WsSink` so the hub is testable without sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{Event, EventType};
use crate::services::event_bus::{EventBus, EventHandler};

/// Event types forwarded to WebSocket observers.
pub const FORWARDED_EVENTS: [EventType; 24] = [
    EventType::AgentStarted,
    EventType::AgentTaskCompleted,
    EventType::AgentToolExecuted,
    EventType::MemoryCreated,
    EventType::MemoryShared,
    EventType::CircleCreated,
    EventType::CircleMemberAdded,
    EventType::ConversationMessage,
    EventType::SystemError,
    EventType::TaskCreated,
    EventType::TaskCompleted,
    EventType::TaskFailed,
    EventType::BackgroundTaskCreated,
    EventType::BackgroundTaskStarted,
    EventType::BackgroundTaskCompleted,
    EventType::BackgroundTaskFailed,
    EventType::BackgroundTaskCancelled,
    EventType::ScheduledActionTriggered,
    EventType::ScheduledActionCompleted,
    EventType::ScheduledActionFailed,
    EventType::PipelineRunStarted,
    EventType::PipelineRunSucceeded,
    EventType::PipelineRunFailed,
    EventType::PipelineRunCancelled,
];

/// Write half of one client connection.
#[async_trait]
pub trait WsSink: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), String>;
}

struct Connection {
    id: Uuid,
    client_id: Option<String>,
    sink: Arc<dyn WsSink>,
}

/// Hub stats snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsHubStats {
    pub active_connections: usize,
    pub total_connections: u64,
    pub messages_sent: u64,
    pub broadcasts: u64,
}

/// Connection registry with concurrent broadcast.
pub struct WsHub {
    connections: RwLock<HashMap<Uuid, Arc<Connection>>>,
    total_connections: AtomicU64,
    messages_sent: AtomicU64,
    broadcasts: AtomicU64,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHub {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            total_connections: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
        }
    }

    /// Register a connection; returns its id.
    pub async fn connect(&self, sink: Arc<dyn WsSink>, client_id: Option<String>) -> Uuid {
        let id = Uuid::new_v4();
        let conn = Arc::new(Connection {
            id,
            client_id,
            sink,
        });
        self.connections.write().await.insert(id, conn);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Remove a connection. Idempotent.
    pub async fn disconnect(&self, id: Uuid) {
        self.connections.write().await.remove(&id);
    }

    /// Send `message` to every connected client concurrently. Clients
    /// whose send fails are disconnected before this returns.
    pub async fn broadcast(&self, message: &serde_json::Value) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        let text = message.to_string();

        let conns: Vec<Arc<Connection>> = {
            let map = self.connections.read().await;
            map.values().cloned().collect()
        };
        if conns.is_empty() {
            return;
        }

        let sends = conns.into_iter().map(|conn| {
            let text = text.clone();
            tokio::spawn(async move {
                let result = conn.sink.send_text(&text).await;
                (conn.id, conn.client_id.clone(), result)
            })
        });

        let mut failed: Vec<Uuid> = Vec::new();
        for joined in join_all(sends).await {
            match joined {
                Ok((_, _, Ok(()))) => {
                    self.messages_sent.fetch_add(1, Ordering::Relaxed);
                }
                Ok((id, client_id, Err(e))) => {
                    tracing::debug!(conn = %id, client = ?client_id, error = %e, "ws send failed; dropping client");
                    failed.push(id);
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "ws send task panicked");
                }
            }
        }

        if !failed.is_empty() {
            let mut map = self.connections.write().await;
            for id in failed {
                map.remove(&id);
            }
        }
    }

    /// Handle a client text frame. Pings get a pong; everything else is
    /// ignored in v1.
    pub fn handle_incoming(&self, text: &str) -> Option<String> {
        let parsed: serde_json::Value = serde_json::from_str(text).ok()?;
        if parsed.get("type").and_then(|t| t.as_str()) == Some("ping") {
            return Some(
                json!({
                    "type": "pong",
                    "timestamp": Utc::now().to_rfc3339(),
                })
                .to_string(),
            );
        }
        None
    }

    /// Subscribe the hub to the forwarded event whitelist.
    pub async fn subscribe_events(self: &Arc<Self>, bus: &EventBus) {
        let handler = Arc::new(ForwardHandler { hub: self.clone() });
        bus.subscribe_many(&FORWARDED_EVENTS, handler).await;
    }

    pub async fn stats(&self) -> WsHubStats {
        WsHubStats {
            active_connections: self.connections.read().await.len(),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }
}

/// The outbound envelope observers receive.
pub fn envelope(event: &Event) -> serde_json::Value {
    let mut env = json!({
        "type": event.event_type.as_str(),
        "data": event.data,
        "event_id": event.id.to_string(),
        "timestamp": event.timestamp.to_rfc3339(),
    });
    if let Some(agent) = event.source_agent_id {
        env["source_agent_id"] = json!(agent.to_string());
    }
    if let Some(circle) = event.circle_id {
        env["circle_id"] = json!(circle.to_string());
    }
    if let Some(project) = event.project_id {
        env["project_id"] = json!(project.to_string());
    }
    env
}

struct ForwardHandler {
    hub: Arc<WsHub>,
}

#[async_trait]
impl EventHandler for ForwardHandler {
    async fn handle(&self, event: &Event) -> Result<(), String> {
        self.hub.broadcast(&envelope(event)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink recording every frame, optionally failing all sends.
    struct TestSink {
        frames: Mutex<Vec<String>>,
        fail: bool,
    }

    impl TestSink {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl WsSink for TestSink {
        async fn send_text(&self, text: &str) -> Result<(), String> {
            if self.fail {
                return Err("connection reset".to_string());
            }
            self.frames.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_clients() {
        let hub = Arc::new(WsHub::new());
        let a = TestSink::ok();
        let b = TestSink::ok();
        hub.connect(a.clone(), Some("a".into())).await;
        hub.connect(b.clone(), Some("b".into())).await;

        hub.broadcast(&json!({"hello": true})).await;
        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);

        let stats = hub.stats().await;
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.broadcasts, 1);
    }

    #[tokio::test]
    async fn test_failing_client_dropped_others_unaffected() {
        let hub = Arc::new(WsHub::new());
        let one = TestSink::ok();
        let two = TestSink::broken();
        let three = TestSink::ok();
        hub.connect(one.clone(), None).await;
        hub.connect(two.clone(), None).await;
        hub.connect(three.clone(), None).await;

        hub.broadcast(&json!({"n": 1})).await;
        assert_eq!(one.count(), 1);
        assert_eq!(three.count(), 1);
        assert_eq!(hub.stats().await.active_connections, 2);

        // The dropped client never sees later broadcasts.
        hub.broadcast(&json!({"n": 2})).await;
        assert_eq!(one.count(), 2);
        assert_eq!(two.count(), 0);
        assert_eq!(three.count(), 2);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let hub = WsHub::new();
        let pong = hub.handle_incoming(r#"{"type":"ping"}"#).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&pong).unwrap();
        assert_eq!(parsed["type"], "pong");
        assert!(parsed["timestamp"].is_string());

        assert!(hub.handle_incoming("not json").is_none());
        assert!(hub.handle_incoming(r#"{"type":"other"}"#).is_none());
    }

    #[tokio::test]
    async fn test_forwards_whitelisted_events_with_envelope() {
        let hub = Arc::new(WsHub::new());
        let bus = EventBus::new(100);
        hub.subscribe_events(&bus).await;

        let sink = TestSink::ok();
        hub.connect(sink.clone(), None).await;

        let agent = Uuid::new_v4();
        bus.publish(
            Event::new(EventType::BackgroundTaskCompleted, json!({"task_id": "t"}))
                .with_agent(agent),
        )
        .await;

        // Unlisted types are not forwarded.
        bus.publish(Event::new(EventType::BackgroundTaskStep, json!({}))).await;

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let env: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(env["type"], "background_task.completed");
        assert_eq!(env["source_agent_id"], agent.to_string());
        assert!(env["event_id"].is_string());
        assert!(env["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let hub = WsHub::new();
        let sink = TestSink::ok();
        let id = hub.connect(sink, None).await;
        hub.disconnect(id).await;
        hub.disconnect(id).await;
        assert_eq!(hub.stats().await.active_connections, 0);
    }
}
