use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{future, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, trace, warn};

use juno_core::ids::ConnectionId;

use crate::connection::{run_connection, serve_lines};
use crate::correlation::ChannelError;
use crate::handlers::{self, HandlerState};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Raw line-delimited listener. Disabled when `None`.
    pub tcp_port: Option<u16>,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8091,
            tcp_port: None,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Handle returned by [`start`]. Dropping it leaves the server running.
pub struct ServerHandle {
    pub port: u16,
    pub tcp_port: Option<u16>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for the listeners to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("server stopped");
    }
}

/// Bind the listeners and start serving.
pub async fn start(config: ServerConfig, handler_state: Arc<HandlerState>) -> Result<ServerHandle, std::io::Error> {
    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    let state = AppState {
        handler_state: Arc::clone(&handler_state),
        max_send_queue: config.max_send_queue,
        heartbeat_interval: config.heartbeat_interval,
    };
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let port = listener.local_addr()?.port();
    let router = build_router(state);
    let http_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(http_shutdown.cancelled_owned())
            .await
        {
            warn!(error = %e, "http server exited with error");
        }
    }));
    info!(port, "websocket server listening");

    let tcp_port = match config.tcp_port {
        Some(requested) => {
            let listener = TcpListener::bind((config.host.as_str(), requested)).await?;
            let bound = listener.local_addr()?.port();
            tasks.push(tokio::spawn(accept_lines(
                listener,
                handler_state,
                config.max_send_queue,
                shutdown.clone(),
            )));
            info!(port = bound, "line listener started");
            Some(bound)
        }
        None => None,
    };

    Ok(ServerHandle {
        port,
        tcp_port,
        shutdown,
        tasks,
    })
}

async fn accept_lines(
    listener: TcpListener,
    state: Arc<HandlerState>,
    max_send_queue: usize,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    let conn_id = ConnectionId::new();
                    debug!(conn = %conn_id, peer = %peer, "line client connected");
                    let (reader, writer) = stream.into_split();
                    let _ = tokio::spawn(serve_lines(conn_id, reader, writer, Arc::clone(&state), max_send_queue));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(handlers::health(&state.handler_state))
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One envelope per text frame. The writer pings every heartbeat interval
/// and drops a client that has been silent for three intervals.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = ConnectionId::new();
    info!(conn = %conn_id, "websocket client connected");

    let (mut ws_tx, ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.max_send_queue);
    let last_seen = Arc::new(Mutex::new(Instant::now()));
    let dead = CancellationToken::new();

    let heartbeat = state.heartbeat_interval;
    let writer_seen = Arc::clone(&last_seen);
    let writer_dead = dead.clone();
    let writer_conn = conn_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat);
        let _ = ping.tick().await;
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    let silent = writer_seen.lock().elapsed();
                    if silent > heartbeat * 3 {
                        warn!(conn = %writer_conn, silent_secs = silent.as_secs(), "client unresponsive, closing");
                        break;
                    }
                    if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    trace!(conn = %writer_conn, "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
        writer_dead.cancel();
    });

    let reader_seen = Arc::clone(&last_seen);
    let inbound = ws_rx
        .take_until(dead.cancelled_owned())
        .filter_map(move |msg| {
            if msg.is_ok() {
                *reader_seen.lock() = Instant::now();
            }
            future::ready(match msg {
                Ok(WsMessage::Text(text)) => Some(Ok(text.to_string())),
                Ok(WsMessage::Binary(_)) => Some(Err(ChannelError::Protocol("binary frames are not supported".into()))),
                Ok(WsMessage::Close(_)) => Some(Err(ChannelError::ConnectionClosed)),
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => None,
                Err(e) => Some(Err(ChannelError::Io(e.to_string()))),
            })
        });

    run_connection(conn_id.clone(), Box::pin(inbound), tx, state.handler_state).await;
    let _ = writer.await;
    info!(conn = %conn_id, "websocket client disconnected");
}
