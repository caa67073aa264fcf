//! HTTP/WebSocket transport.
//!
//! A thin axum surface: `/ws` upgrades observers into the WsHub and
//! `/health` reports liveness. The hub itself is transport-agnostic;
//! each socket is adapted to a `WsSink` backed by a bounded channel so a
//! stalled client fails its sends and gets dropped instead of blocking
//! the broadcast path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::domain::models::config::WsConfig;
use crate::services::ws_hub::{WsHub, WsSink};

/// Per-connection outbound buffer; a client this far behind is dropped.
const OUTBOUND_BUFFER: usize = 256;

/// Sink adapter: hub broadcasts go through a bounded channel that the
/// socket's writer task drains.
struct ChannelSink {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl WsSink for ChannelSink {
    async fn send_text(&self, text: &str) -> Result<(), String> {
        self.tx
            .try_send(text.to_string())
            .map_err(|e| format!("outbound buffer: {e}"))
    }
}

struct HttpState {
    hub: Arc<WsHub>,
    heartbeat: Duration,
}

/// The observer-facing HTTP server.
pub struct HttpServer {
    state: Arc<HttpState>,
    config: WsConfig,
}

impl HttpServer {
    pub fn new(hub: Arc<WsHub>, config: WsConfig) -> Self {
        Self {
            state: Arc::new(HttpState {
                hub,
                heartbeat: Duration::from_secs(config.heartbeat_interval_seconds.max(1)),
            }),
            config,
        }
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_upgrade))
            .route("/health", get(health))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
    }

    /// Serve until the shutdown future resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let router = self.build_router();
        tracing::info!(%addr, "websocket server listening");

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WsParams {
    client_id: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<HttpState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_socket(socket, params.client_id, state.hub.clone(), state.heartbeat)
    })
}

async fn handle_socket(
    socket: WebSocket,
    client_id: Option<String>,
    hub: Arc<WsHub>,
    heartbeat: Duration,
) {
    let (mut writer, mut reader) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let conn_id = hub.connect(Arc::new(ChannelSink { tx: tx.clone() }), client_id).await;

    // Writer task drains the outbound buffer and keeps the connection
    // alive with periodic protocol pings.
    let writer_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(text) = outbound else { break };
                    if writer.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if writer.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Some(reply) = hub.handle_incoming(&text) {
                    if tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    hub.disconnect(conn_id).await;
    writer_task.abort();
}

async fn health(State(state): State<Arc<HttpState>>) -> Json<serde_json::Value> {
    let stats = state.hub.stats().await;
    Json(json!({
        "status": "healthy",
        "service": "coterie",
        "active_connections": stats.active_connections,
        "broadcasts": stats.broadcasts,
    }))
}
