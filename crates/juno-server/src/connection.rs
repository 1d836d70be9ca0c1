//! Per-connection request loop.
//!
//! One loop per connected client, independent of transport. Each request
//! runs in its own task, so a slow turn never stalls the connection.
//! Responses go out in completion order and the client matches them by id.

use std::sync::Arc;

use futures::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use juno_core::ids::ConnectionId;

use crate::correlation::{ChannelError, CorrelationKey, PendingMap};
use crate::handlers::{self, HandlerState};
use crate::rpc::{RpcRequest, RpcResponse, INVALID_REQUEST};

/// Frames above this are rejected with a parse error.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Drive one connection until `inbound` ends.
///
/// Frames that fail to parse get an error response and the loop continues.
/// A transport error ends the loop. On exit every in-flight id is failed in
/// the pending map; the turns themselves run to completion and their
/// responses are dropped.
pub async fn run_connection<S>(
    conn_id: ConnectionId,
    mut inbound: S,
    outbound: mpsc::Sender<String>,
    state: Arc<HandlerState>,
) where
    S: Stream<Item = Result<String, ChannelError>> + Unpin,
{
    let pending: Arc<PendingMap<()>> = Arc::new(PendingMap::new());
    let mut tasks = JoinSet::new();
    info!(conn = %conn_id, "connection opened");

    loop {
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(Ok(text)) => {
                    handle_frame(&conn_id, &text, &outbound, &state, &pending, &mut tasks).await;
                }
                Some(Err(ChannelError::Protocol(detail))) => {
                    warn!(conn = %conn_id, detail = %detail, "rejected frame");
                    send(&outbound, &RpcResponse::parse_error(detail)).await;
                }
                Some(Err(e)) => {
                    warn!(conn = %conn_id, error = %e, "transport error");
                    break;
                }
                None => break,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    warn!(conn = %conn_id, error = %e, "request task panicked");
                }
            }
        }
    }

    let abandoned = pending.fail_all();
    info!(conn = %conn_id, in_flight = abandoned, "connection closed");
    while tasks.join_next().await.is_some() {}
}

async fn handle_frame(
    conn_id: &ConnectionId,
    text: &str,
    outbound: &mpsc::Sender<String>,
    state: &Arc<HandlerState>,
    pending: &Arc<PendingMap<()>>,
    tasks: &mut JoinSet<()>,
) {
    let request: RpcRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            debug!(conn = %conn_id, error = %e, "malformed envelope");
            send(outbound, &RpcResponse::parse_error(e)).await;
            return;
        }
    };
    let id = match request.id {
        Some(id) if !id.is_null() => id,
        _ => {
            let resp = RpcResponse::error(Value::Null, INVALID_REQUEST, "request id is required");
            send(outbound, &resp).await;
            return;
        }
    };

    let key = CorrelationKey::from_id(&id);
    if let Err(e) = pending.register(key.clone()) {
        warn!(conn = %conn_id, id = %key, "duplicate in-flight id");
        send(outbound, &RpcResponse::error(id, INVALID_REQUEST, e.to_string())).await;
        return;
    }

    let state = Arc::clone(state);
    let pending = Arc::clone(pending);
    let outbound = outbound.clone();
    let params = request.params.unwrap_or(Value::Null);
    let method = request.method;
    let conn = conn_id.clone();
    let _ = tasks.spawn(async move {
        debug!(conn = %conn, id = %key, method = %method, "request started");
        let response = handlers::dispatch(&state, &method, &params, id).await;
        // a failed id means the connection is gone
        if pending.resolve(&key, ()) {
            send(&outbound, &response).await;
        }
        debug!(conn = %conn, id = %key, method = %method, error = response.is_error(), "request finished");
    });
}

async fn send(outbound: &mpsc::Sender<String>, response: &RpcResponse) {
    match serde_json::to_string(response) {
        Ok(json) => {
            let _ = outbound.send(json).await;
        }
        Err(e) => warn!(error = %e, "response serialization failed"),
    }
}

fn map_line_error(e: LinesCodecError) -> ChannelError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            ChannelError::Protocol(format!("frame exceeds {MAX_FRAME_BYTES} bytes"))
        }
        LinesCodecError::Io(io) => ChannelError::Io(io.to_string()),
    }
}

/// Serve newline-delimited envelopes over a byte stream.
pub async fn serve_lines<R, W>(
    conn_id: ConnectionId,
    reader: R,
    writer: W,
    state: Arc<HandlerState>,
    max_send_queue: usize,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let inbound = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_BYTES))
        .map(|r| r.map_err(map_line_error));
    let (tx, mut rx) = mpsc::channel::<String>(max_send_queue);

    let writer_conn = conn_id.clone();
    let writer = tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, LinesCodec::new());
        while let Some(line) = rx.recv().await {
            if let Err(e) = sink.send(line).await {
                debug!(conn = %writer_conn, error = %e, "line write failed");
                break;
            }
        }
    });

    run_connection(conn_id, inbound, tx, state).await;
    let _ = writer.await;
}
