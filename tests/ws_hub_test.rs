//! WsHub integration scenarios: fan-out fault isolation and the
//! bus-to-observer forwarding path.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coterie::domain::models::{Event, EventType};
use coterie::services::ws_hub::{envelope, WsHub, WsSink};
use coterie::services::EventBus;

struct RecordingSink {
    frames: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingSink {
    fn healthy() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl WsSink for RecordingSink {
    async fn send_text(&self, text: &str) -> Result<(), String> {
        if self.fail {
            return Err("broken pipe".to_string());
        }
        self.frames.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn failing_client_is_isolated_and_dropped() {
    let hub = Arc::new(WsHub::new());
    let client1 = RecordingSink::healthy();
    let client2 = RecordingSink::failing();
    let client3 = RecordingSink::healthy();

    hub.connect(client1.clone(), Some("c1".into())).await;
    hub.connect(client2.clone(), Some("c2".into())).await;
    hub.connect(client3.clone(), Some("c3".into())).await;
    assert_eq!(hub.stats().await.active_connections, 3);

    // First broadcast: healthy clients receive, the broken one is
    // disconnected before the call returns.
    hub.broadcast(&serde_json::json!({"seq": 1})).await;
    assert_eq!(client1.frames().len(), 1);
    assert_eq!(client3.frames().len(), 1);
    assert!(client2.frames().is_empty());
    assert_eq!(hub.stats().await.active_connections, 2);

    // Subsequent broadcasts never reference the dropped client.
    hub.broadcast(&serde_json::json!({"seq": 2})).await;
    assert_eq!(client1.frames().len(), 2);
    assert_eq!(client3.frames().len(), 2);
    assert!(client2.frames().is_empty());

    let stats = hub.stats().await;
    assert_eq!(stats.total_connections, 3);
    assert_eq!(stats.messages_sent, 4);
    assert_eq!(stats.broadcasts, 2);
}

#[tokio::test]
async fn bus_events_arrive_as_envelopes() {
    let hub = Arc::new(WsHub::new());
    let bus = EventBus::new(100);
    hub.subscribe_events(&bus).await;

    let client = RecordingSink::healthy();
    hub.connect(client.clone(), None).await;

    let agent = uuid::Uuid::new_v4();
    let circle = uuid::Uuid::new_v4();
    let event = Event::new(
        EventType::CircleMemberAdded,
        serde_json::json!({"member": "scout"}),
    )
    .with_agent(agent)
    .with_circle(circle);
    let event_id = event.id;
    bus.publish(event).await;

    let frames = client.frames();
    assert_eq!(frames.len(), 1);
    let received: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(received["type"], "circle.member.added");
    assert_eq!(received["data"]["member"], "scout");
    assert_eq!(received["source_agent_id"], agent.to_string());
    assert_eq!(received["circle_id"], circle.to_string());
    assert_eq!(received["event_id"], event_id.to_string());
    assert!(received["timestamp"].is_string());
}

#[tokio::test]
async fn envelope_omits_absent_refs() {
    let event = Event::new(EventType::SystemError, serde_json::json!({"msg": "boom"}));
    let env = envelope(&event);
    assert!(env.get("source_agent_id").is_none());
    assert!(env.get("circle_id").is_none());
    assert!(env.get("project_id").is_none());
    assert_eq!(env["type"], "system.error");
}

#[tokio::test]
async fn ping_gets_pong_with_timestamp() {
    let hub = WsHub::new();
    let reply = hub.handle_incoming(r#"{"type":"ping"}"#).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(parsed["type"], "pong");
    assert!(chrono::DateTime::parse_from_rfc3339(parsed["timestamp"].as_str().unwrap()).is_ok());
}
