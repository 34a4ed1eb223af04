//! Connection handlers for the Courier relay server.
//!
//! This module owns the connection lifecycle: it upgrades WebSocket
//! requests, wires each socket to a relay dispatcher, and pumps frames in
//! both directions until the transport closes.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::{Bytes, BytesMut};
use courier_core::{ConnectionHandle, ConnectionId, Dispatcher, PresenceRegistry, SessionEvent};
use courier_protocol::{codec, Frame};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The presence registry, shared by every connection task.
    pub registry: Arc<PresenceRegistry>,
    /// Server configuration.
    pub config: Config,
    /// Number of currently open connections.
    active_connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            registry: Arc::new(PresenceRegistry::new()),
            config,
            active_connections: AtomicUsize::new(0),
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Courier relay listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let active = state.active_connections.load(Ordering::Relaxed);
    if active >= state.config.limits.max_connections {
        warn!(active, "Connection limit reached, refusing upgrade");
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, state))
        .into_response()
}

/// Handle a WebSocket connection from upgrade to teardown.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    state.active_connections.fetch_add(1, Ordering::Relaxed);

    let connection_id = ConnectionId::generate();
    debug!(connection = %connection_id, "WebSocket connected");

    // The handle goes to the dispatcher (and through it, the registry);
    // this task drains the receiving half into the socket.
    let (handle, mut outbound_rx) = ConnectionHandle::new(connection_id.clone());
    let mut dispatcher = Dispatcher::new(Arc::clone(&state.registry), handle);

    let (mut sender, mut receiver) = socket.split();

    // Greet the client with its connection id and heartbeat interval
    let greeting = Frame::connected(
        connection_id.as_str(),
        state.config.heartbeat.interval_ms as u32,
    );
    if let Ok(data) = codec::encode(&greeting) {
        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
            error!(connection = %connection_id, "Failed to send greeting");
            state.active_connections.fetch_sub(1, Ordering::Relaxed);
            return;
        }
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    'conn: loop {
        tokio::select! {
            biased;

            // Payloads forwarded to this connection by other dispatchers
            Some(payload) = outbound_rx.recv() => {
                let frame = Frame::deliver(payload.to_vec());
                if let Ok(data) = codec::encode(&frame) {
                    metrics::record_message(data.len(), "outbound");
                    if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                        break 'conn;
                    }
                }
            }

            // Inbound traffic from the client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_message_size {
                            warn!(
                                connection = %connection_id,
                                size = data.len(),
                                "Inbound message exceeds size limit, closing"
                            );
                            metrics::record_error("oversized");
                            break 'conn;
                        }
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from(&mut read_buffer) {
                                Ok(Some(frame)) => {
                                    if handle_frame(frame, &mut dispatcher, &mut sender, &state)
                                        .await
                                        .is_err()
                                    {
                                        break 'conn;
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    // Malformed input never reaches the
                                    // dispatcher; the connection ends here.
                                    warn!(connection = %connection_id, error = %e, "Protocol error");
                                    metrics::record_error("protocol");
                                    break 'conn;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break 'conn;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break 'conn;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break 'conn;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break 'conn;
                    }
                }
            }
        }
    }

    // Teardown: release this connection's registration, but never a newer
    // connection's re-registration of the same identity.
    dispatcher.close();
    metrics::set_users_online(state.registry.len());
    state.active_connections.fetch_sub(1, Ordering::Relaxed);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle a decoded frame.
async fn handle_frame(
    frame: Frame,
    dispatcher: &mut Dispatcher,
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    state: &Arc<AppState>,
) -> Result<()> {
    match frame {
        Frame::Announce { user_id } => {
            let start = Instant::now();
            let outcome = dispatcher.dispatch(SessionEvent::Announce { user_id });
            metrics::record_outcome(outcome);
            metrics::record_latency(start.elapsed().as_secs_f64());
            metrics::set_users_online(state.registry.len());
        }

        Frame::Send { to, payload } => {
            let start = Instant::now();
            let outcome = dispatcher.dispatch(SessionEvent::Send {
                to,
                payload: Bytes::from(payload),
            });
            // Delivered, dropped and ignored all look the same to the
            // sender; only the metrics can tell them apart.
            metrics::record_outcome(outcome);
            metrics::record_latency(start.elapsed().as_secs_f64());
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, &Frame::pong(timestamp)).await?;
        }

        Frame::Pong { .. } => {
            // Keepalive reply, nothing to do
        }

        Frame::Connected { .. } | Frame::Deliver { .. } => {
            warn!(
                connection = %dispatcher.connection_id(),
                kind = frame.kind(),
                "Server-to-client frame received from client, ignoring"
            );
        }
    }

    Ok(())
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    frame: &Frame,
) -> Result<()> {
    let data = codec::encode(frame)?;
    metrics::record_message(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
