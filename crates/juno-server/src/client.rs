//! Duplex RPC client.
//!
//! Many calls share one connection. Each call registers its id in a
//! [`PendingMap`] before the request is written; the reader task settles
//! tickets as responses arrive, in any order. When the connection ends every
//! outstanding call fails with [`ChannelError::ConnectionClosed`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{future, SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use crate::connection::MAX_FRAME_BYTES;
use crate::correlation::{self, ChannelError, CorrelationKey, PendingMap};
use crate::rpc::{RpcRequest, RpcResponse};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

pub struct RpcClient {
    outbound: mpsc::Sender<String>,
    pending: Arc<PendingMap<Value>>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    call_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RpcClient {
    /// Connect to a `/ws` endpoint, e.g. `ws://127.0.0.1:8091/ws`.
    pub async fn connect_ws(url: &str) -> Result<Self, ChannelError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ChannelError::Io(e.to_string()))?;
        let (mut sink, stream) = socket.split();
        let (tx, mut rx) = mpsc::channel::<String>(64);

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let inbound = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => Some(Err(ChannelError::ConnectionClosed)),
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::Io(e.to_string()))),
            })
        });
        Ok(Self::spawn(inbound, tx, writer))
    }

    /// Connect to the line-delimited listener.
    pub async fn connect_tcp(addr: &str) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ChannelError::Io(e.to_string()))?;
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<String>(64);

        let writer = tokio::spawn(async move {
            let mut sink = FramedWrite::new(write, LinesCodec::new());
            while let Some(line) = rx.recv().await {
                if sink.send(line).await.is_err() {
                    break;
                }
            }
        });

        let inbound = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_FRAME_BYTES))
            .map(|r| r.map_err(|e| ChannelError::Io(e.to_string())));
        Ok(Self::spawn(inbound, tx, writer))
    }

    fn spawn<S>(inbound: S, outbound: mpsc::Sender<String>, writer: JoinHandle<()>) -> Self
    where
        S: Stream<Item = Result<String, ChannelError>> + Send + 'static,
    {
        let pending = Arc::new(PendingMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_responses(
            Box::pin(inbound),
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));
        Self {
            outbound,
            pending,
            closed,
            next_id: AtomicU64::new(1),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            reader,
            writer,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one request and wait for its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::ConnectionClosed);
        }
        let id = json!(self.next_id.fetch_add(1, Ordering::Relaxed));
        let key = CorrelationKey::from_id(&id);
        let ticket = self.pending.register(key.clone())?;
        // the reader may have closed between the check and the register
        if self.is_closed() {
            let _ = self.pending.fail(&key, ChannelError::ConnectionClosed);
        }

        let frame = serde_json::to_string(&RpcRequest::new(id, method, params))
            .map_err(|e| ChannelError::Protocol(e.to_string()))?;
        if self.outbound.send(frame).await.is_err() {
            let _ = self.pending.fail(&key, ChannelError::ConnectionClosed);
        }

        match tokio::time::timeout(self.call_timeout, correlation::wait(ticket)).await {
            Ok(result) => result,
            Err(_) => {
                let _ = self.pending.fail(&key, ChannelError::Timeout);
                Err(ChannelError::Timeout)
            }
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
        let _ = self.pending.fail_all();
    }
}

async fn read_responses<S>(mut inbound: S, pending: Arc<PendingMap<Value>>, closed: Arc<AtomicBool>)
where
    S: Stream<Item = Result<String, ChannelError>> + Unpin,
{
    while let Some(frame) = inbound.next().await {
        let text = match frame {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "client channel ended");
                break;
            }
        };
        let response: RpcResponse = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "unparseable response frame");
                continue;
            }
        };
        let key = CorrelationKey::from_id(&response.id);
        let settled = match response.error {
            Some(err) => pending.fail(
                &key,
                ChannelError::Remote {
                    code: err.code,
                    message: err.message,
                },
            ),
            None => pending.resolve(&key, response.result.unwrap_or(Value::Null)),
        };
        if !settled {
            warn!(id = %key, "response for unknown request id");
        }
    }
    closed.store(true, Ordering::SeqCst);
    let failed = pending.fail_all();
    if failed > 0 {
        debug!(failed, "failed in-flight calls on close");
    }
}
