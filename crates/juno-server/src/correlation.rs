//! Request/response correlation over one duplex channel.
//!
//! Each in-flight request id maps to a one-shot handle. A handle is settled
//! exactly once: resolved with its response, or failed when the channel goes
//! away. Dropping the map fails every outstanding handle.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("duplicate request id: {0}")]
    DuplicateId(String),
    #[error("request timed out")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },
}

/// Canonical map key for a JSON-RPC id. `1` and `"1"` stay distinct.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn from_id(id: &Value) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Ticket<T> = oneshot::Receiver<Result<T, ChannelError>>;

pub struct PendingMap<T> {
    pending: Mutex<HashMap<CorrelationKey, oneshot::Sender<Result<T, ChannelError>>>>,
}

impl<T> Default for PendingMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PendingMap<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Open a handle for `key`. Fails if the key is already in flight.
    pub fn register(&self, key: CorrelationKey) -> Result<Ticket<T>, ChannelError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&key) {
            return Err(ChannelError::DuplicateId(key.0));
        }
        let (tx, rx) = oneshot::channel();
        let _ = pending.insert(key, tx);
        Ok(rx)
    }

    /// Settle `key` with `value`. Returns false for unknown or settled keys.
    pub fn resolve(&self, key: &CorrelationKey, value: T) -> bool {
        self.settle(key, Ok(value))
    }

    pub fn fail(&self, key: &CorrelationKey, error: ChannelError) -> bool {
        self.settle(key, Err(error))
    }

    fn settle(&self, key: &CorrelationKey, outcome: Result<T, ChannelError>) -> bool {
        let sender = self.pending.lock().remove(key);
        match sender {
            // a dropped receiver still counts as settled
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding handle with [`ChannelError::ConnectionClosed`].
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(ChannelError::ConnectionClosed));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Await a ticket. A handle whose sender vanished counts as a closed
/// connection.
pub async fn wait<T>(ticket: Ticket<T>) -> Result<T, ChannelError> {
    ticket.await.unwrap_or(Err(ChannelError::ConnectionClosed))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key(id: Value) -> CorrelationKey {
        CorrelationKey::from_id(&id)
    }

    #[tokio::test]
    async fn resolve_delivers_once() {
        let map = PendingMap::<u32>::new();
        let ticket = map.register(key(json!(1))).unwrap();
        assert!(map.resolve(&key(json!(1)), 42));
        assert!(!map.resolve(&key(json!(1)), 43));
        assert_eq!(wait(ticket).await, Ok(42));
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn out_of_order_resolution() {
        let map = PendingMap::<&'static str>::new();
        let a = map.register(key(json!("a"))).unwrap();
        let b = map.register(key(json!("b"))).unwrap();
        assert!(map.resolve(&key(json!("b")), "B"));
        assert!(map.resolve(&key(json!("a")), "A"));
        assert_eq!(wait(a).await, Ok("A"));
        assert_eq!(wait(b).await, Ok("B"));
    }

    #[test]
    fn duplicate_in_flight_rejected() {
        let map = PendingMap::<()>::new();
        let _t = map.register(key(json!(5))).unwrap();
        assert_eq!(
            map.register(key(json!(5))).err(),
            Some(ChannelError::DuplicateId("5".into()))
        );
        // numeric and string ids do not alias
        assert!(map.register(key(json!("5"))).is_ok());
    }

    #[test]
    fn id_reusable_after_settle() {
        let map = PendingMap::<()>::new();
        let _t = map.register(key(json!(1))).unwrap();
        assert!(map.resolve(&key(json!(1)), ()));
        assert!(map.register(key(json!(1))).is_ok());
    }

    #[tokio::test]
    async fn fail_all_settles_every_handle() {
        let map = PendingMap::<u32>::new();
        let tickets: Vec<_> = (0..5).map(|i| map.register(key(json!(i))).unwrap()).collect();
        assert_eq!(map.fail_all(), 5);
        for t in tickets {
            assert_eq!(wait(t).await, Err(ChannelError::ConnectionClosed));
        }
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn dropping_map_fails_handles() {
        let map = PendingMap::<u32>::new();
        let ticket = map.register(key(json!(1))).unwrap();
        drop(map);
        assert_eq!(wait(ticket).await, Err(ChannelError::ConnectionClosed));
    }
}
