//! WebSocket transport server using Axum.
//!
//! Handles HTTP upgrade to WebSocket, registration, heartbeat probes,
//! control-frame dispatch and graceful/forced connection close.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use wsgate_protocol::{ControlFrame, GatewayError, InboundFrame, Limits};

use crate::connection::{ConnectionId, ConnectionRecord};
use crate::dispatcher::{Dispatch, dispatch_binary, dispatch_text};
use crate::heartbeat::{HeartbeatConfig, spawn_heartbeat};
use crate::lifecycle::{Phase, ShutdownReason, ShutdownState};
use crate::registry::ConnectionRegistry;

/// Queued heartbeat probes per connection.
const PROBE_QUEUE: usize = 4;
/// Queued outbound frames per connection.
const OUTBOUND_QUEUE: usize = 64;
/// Application frames waiting on the handler per connection.
const FORWARD_QUEUE: usize = 64;

/// Application layer seam. Receives every well-formed frame that is not a
/// gateway control frame, and may return a text reply for the peer.
pub trait FrameHandler: Send + Sync + 'static {
    fn handle_frame(
        &self,
        client_id: &ConnectionId,
        frame: InboundFrame,
    ) -> impl std::future::Future<Output = Option<String>> + Send;
}

/// Drops application frames. Used when no application layer is mounted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardHandler;

impl FrameHandler for DiscardHandler {
    fn handle_frame(
        &self,
        client_id: &ConnectionId,
        frame: InboundFrame,
    ) -> impl std::future::Future<Output = Option<String>> + Send {
        debug!(%client_id, kind = frame.kind(), "no application handler, frame dropped");
        async { None }
    }
}

/// The host HTTP listener as seen by the shutdown sequence.
pub trait HostListener: Send + Sync + 'static {
    /// Stop accepting HTTP connections and wait for the listener to finish.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Largest accepted inbound message / frame, in bytes
    pub max_frame_bytes: usize,
    /// Heartbeat timing
    pub heartbeat: HeartbeatConfig,
    /// Enable permissive CORS on the HTTP routes
    pub enable_cors: bool,
    /// Enable verbose connection logging
    pub verbose_logging: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 7070,
            hostname: "127.0.0.1".into(),
            max_connections: Some(Limits::MAX_CONNECTIONS),
            max_frame_bytes: Limits::MAX_FRAME_BYTES,
            heartbeat: HeartbeatConfig::default(),
            enable_cors: false,
            verbose_logging: false,
        }
    }
}

/// Shared state for the transport server.
struct AppState<H: FrameHandler> {
    handler: Arc<H>,
    config: TransportConfig,
    registry: Arc<ConnectionRegistry>,
    state: Arc<ShutdownState>,
}

/// The transport server. Owns the host listener and the connection registry.
pub struct TransportServer {
    registry: Arc<ConnectionRegistry>,
    /// Closes the host listener
    listener_close: CancellationToken,
    /// Server task handle
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Actual bound port
    port: u16,
}

impl TransportServer {
    /// Bind the listener and start serving.
    pub async fn start<H: FrameHandler>(
        config: TransportConfig,
        handler: H,
        state: Arc<ShutdownState>,
    ) -> Result<Self, GatewayError> {
        Self::start_with_handler(config, Arc::new(handler), state).await
    }

    /// Start with a handler that is shared with other subsystems.
    pub async fn start_with_handler<H: FrameHandler>(
        config: TransportConfig,
        handler: Arc<H>,
        state: Arc<ShutdownState>,
    ) -> Result<Self, GatewayError> {
        let registry = Arc::new(ConnectionRegistry::new(
            state.clone(),
            config.max_connections,
        ));
        let app = router(config.clone(), handler, registry.clone(), state.clone());

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!(
            "wsgate listening on ws://{}:{}{}",
            config.hostname,
            actual_port,
            Limits::UPGRADE_PATH
        );

        let listener_close = CancellationToken::new();
        let close = listener_close.clone();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { close.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "host listener failed");
                state.request_shutdown(ShutdownReason::Fault(format!("host listener failed: {e}")));
            }
        });

        Ok(Self {
            registry,
            listener_close,
            handle: Mutex::new(Some(handle)),
            port: actual_port,
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl HostListener for TransportServer {
    fn close(&self) -> impl std::future::Future<Output = ()> + Send {
        async move {
            self.listener_close.cancel();
            let handle = self.handle.lock().take();
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    warn!(error = %e, "host listener task did not finish cleanly");
                }
            }
            info!("host listener closed");
        }
    }
}

/// Build the HTTP router: the upgrade endpoint plus `/health`.
pub fn router<H: FrameHandler>(
    config: TransportConfig,
    handler: Arc<H>,
    registry: Arc<ConnectionRegistry>,
    state: Arc<ShutdownState>,
) -> Router {
    let enable_cors = config.enable_cors;
    let app_state = Arc::new(AppState {
        handler,
        config,
        registry,
        state,
    });

    let app = Router::new()
        .route(Limits::UPGRADE_PATH, get(ws_upgrade_handler::<H>))
        .route(Limits::HEALTH_PATH, get(health_handler::<H>))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler<H: FrameHandler>(
    ws: WebSocketUpgrade,
    State(app): State<Arc<AppState<H>>>,
) -> Response {
    if let Err(e) = app.registry.admit() {
        warn!("Connection rejected: {e}");
        return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
    }

    let max = app.config.max_frame_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| handle_ws_connection(socket, app))
        .into_response()
}

async fn health_handler<H: FrameHandler>(State(app): State<Arc<AppState<H>>>) -> Response {
    let phase = app.state.phase();
    let (status, label) = match phase {
        Phase::Running => (StatusCode::OK, "ok"),
        Phase::Draining | Phase::Closed => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
    };
    let body = Json(json!({
        "status": label,
        "phase": phase.as_str(),
        "connections": app.registry.len(),
    }));
    (status, body).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

/// How a connection task ended.
#[derive(Debug)]
enum ConnectionExit {
    PeerClosed,
    Terminated,
    TransportError(GatewayError),
}

async fn handle_ws_connection<H: FrameHandler>(socket: WebSocket, app: Arc<AppState<H>>) {
    let record = Arc::new(ConnectionRecord::new());
    let client_id = record.id.clone();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Registration precedes the heartbeat start.
    if let Err(e) = app.registry.register(record.clone()) {
        warn!(%client_id, "Connection refused after upgrade: {e}");
        let _ = ws_tx.send(going_away()).await;
        return;
    }
    info!(%client_id, live = app.registry.len(), "Client connected");

    let (probe_tx, mut probe_rx) = mpsc::channel::<Bytes>(PROBE_QUEUE);
    spawn_heartbeat(record.clone(), app.config.heartbeat, probe_tx);

    // Socket writes and application handling run beside the read loop, so
    // neither a stalled peer nor a slow handler hides pongs or termination.
    let (out_tx, out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let (frame_tx, frame_rx) = mpsc::channel::<InboundFrame>(FORWARD_QUEUE);
    let mut writer = tokio::spawn(write_loop(ws_tx, out_rx));
    let worker = tokio::spawn(handler_loop(
        app.clone(),
        client_id.clone(),
        frame_rx,
        out_tx.clone(),
    ));

    let mut closing = false;
    let exit = loop {
        tokio::select! {
            biased;

            // Forced termination: drop the socket without a close handshake.
            () = record.terminated() => break ConnectionExit::Terminated,

            // The writer only stops early when the socket fails.
            written = &mut writer => {
                break match written {
                    Ok(Ok(())) => ConnectionExit::PeerClosed,
                    Ok(Err(e)) => ConnectionExit::TransportError(e),
                    Err(e) => ConnectionExit::TransportError(GatewayError::Transport(e.to_string())),
                };
            }

            // Graceful close requested by the shutdown sequence.
            () = record.close_requested(), if !closing => {
                closing = true;
                debug!(%client_id, "sending close frame");
                if out_tx.try_send(going_away()).is_err() {
                    warn!(%client_id, "outbound queue full, close frame not queued");
                }
            }

            // Heartbeat probe. One that cannot be queued stays outstanding.
            Some(payload) = probe_rx.recv() => {
                let _ = out_tx.try_send(Message::Ping(payload));
            }

            // Incoming WebSocket message
            msg = ws_rx.next() => {
                let dispatch = match msg {
                    Some(Ok(Message::Text(text))) => dispatch_text(&client_id, text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => dispatch_binary(&client_id, &bytes),
                    Some(Ok(Message::Pong(_))) => {
                        record.mark_alive();
                        continue;
                    }
                    // Pings are answered by the protocol layer.
                    Some(Ok(Message::Ping(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break ConnectionExit::PeerClosed,
                    Some(Err(e)) => {
                        break ConnectionExit::TransportError(GatewayError::Transport(e.to_string()));
                    }
                };

                let queued = match dispatch {
                    Dispatch::Reply(frame) => match encode(&client_id, &frame) {
                        Some(text) => enqueue(&record, &out_tx, Message::Text(text.into()), "outbound queue").await,
                        None => Ok(()),
                    },
                    Dispatch::Forward(frame) => enqueue(&record, &frame_tx, frame, "handler queue").await,
                };
                if let Err(exit) = queued {
                    break exit;
                }
            }
        }
    };

    writer.abort();
    worker.abort();

    match &exit {
        ConnectionExit::PeerClosed => debug!(%client_id, "Client closed connection"),
        ConnectionExit::Terminated => warn!(%client_id, "Connection terminated"),
        ConnectionExit::TransportError(e) => warn!(%client_id, "WebSocket error: {e}"),
    }

    app.registry.unregister(&client_id);
    if app.config.verbose_logging {
        info!(%client_id, age_ms = record.age().as_millis() as u64, ?exit, "connection record released");
    }
    info!(%client_id, live = app.registry.len(), "Client disconnected");
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the socket sink. Ends when the queue closes or a write fails.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Message>,
) -> Result<(), GatewayError> {
    while let Some(msg) = out_rx.recv().await {
        ws_tx
            .send(msg)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
    }
    Ok(())
}

/// Feeds application frames to the handler one at a time, in arrival order.
async fn handler_loop<H: FrameHandler>(
    app: Arc<AppState<H>>,
    client_id: ConnectionId,
    mut frame_rx: mpsc::Receiver<InboundFrame>,
    out_tx: mpsc::Sender<Message>,
) {
    while let Some(frame) = frame_rx.recv().await {
        if let Some(reply) = app.handler.handle_frame(&client_id, frame).await {
            if out_tx.send(Message::Text(reply.into())).await.is_err() {
                break;
            }
        }
    }
}

/// Queue `item`, waiting for room unless the connection is terminated first.
async fn enqueue<T>(
    record: &ConnectionRecord,
    tx: &mpsc::Sender<T>,
    item: T,
    queue: &'static str,
) -> Result<(), ConnectionExit> {
    tokio::select! {
        biased;
        () = record.terminated() => Err(ConnectionExit::Terminated),
        sent = tx.send(item) => sent
            .map_err(|_| ConnectionExit::TransportError(GatewayError::Transport(format!("{queue} closed")))),
    }
}

fn encode(client_id: &ConnectionId, frame: &ControlFrame) -> Option<String> {
    match frame.to_json() {
        Ok(text) => Some(text),
        Err(e) => {
            error!(%client_id, error = %e, "Failed to encode control frame");
            None
        }
    }
}

fn going_away() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: Utf8Bytes::from_static(Limits::DRAIN_CLOSE_REASON),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_router() -> (Router, Arc<ConnectionRegistry>, Arc<ShutdownState>) {
        let state = Arc::new(ShutdownState::new());
        let registry = Arc::new(ConnectionRegistry::new(state.clone(), Some(8)));
        let app = router(
            TransportConfig::default(),
            Arc::new(DiscardHandler),
            registry.clone(),
            state.clone(),
        );
        (app, registry, state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn default_config_uses_reference_limits() {
        let config = TransportConfig::default();
        assert_eq!(config.max_frame_bytes, 5 * 1024 * 1024);
        assert_eq!(config.heartbeat, HeartbeatConfig::default());
        assert_eq!(config.max_connections, Some(Limits::MAX_CONNECTIONS));
    }

    #[tokio::test]
    async fn health_reports_running() {
        let (app, registry, _state) = make_router();
        registry.register(Arc::new(ConnectionRecord::new())).unwrap();

        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["phase"], "running");
        assert_eq!(body["connections"], 1);
    }

    #[tokio::test]
    async fn health_reports_draining() {
        let (app, _registry, state) = make_router();
        state.request_shutdown(ShutdownReason::Signal("SIGTERM".into()));

        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["phase"], "draining");
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (app, _registry, _state) = make_router();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn discard_handler_returns_no_reply() {
        let frame = InboundFrame::decode(r#"{"type":"chat"}"#).unwrap();
        let reply = DiscardHandler.handle_frame(&ConnectionId::new(), frame).await;
        assert!(reply.is_none());
    }

    #[test]
    fn going_away_uses_1001() {
        match going_away() {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1001);
                assert_eq!(frame.reason.as_str(), "Server shutting down");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_server_binds_and_closes() {
        let state = Arc::new(ShutdownState::new());
        let config = TransportConfig {
            port: 0,
            ..TransportConfig::default()
        };
        let server = TransportServer::start(config, DiscardHandler, state).await.unwrap();
        assert_ne!(server.port(), 0);
        assert!(server.registry().is_empty());

        tokio::time::timeout(std::time::Duration::from_secs(5), server.close())
            .await
            .expect("listener should close");
        // Closing twice is harmless.
        server.close().await;
    }
}
