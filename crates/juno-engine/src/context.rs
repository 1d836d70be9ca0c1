use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use juno_core::provider::{EmbedTask, EmbeddingProvider};
use juno_core::records::{ConversationRecord, Role};
use juno_core::tenant::TenantIdentity;
use juno_store::DocumentStore;

#[derive(Clone, Debug)]
pub struct ContextConfig {
    pub top_k: usize,
    /// Records must score strictly above this.
    pub similarity_threshold: f32,
    pub recent_window: usize,
    pub embed_timeout: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.7,
            recent_window: 4,
            embed_timeout: Duration::from_secs(5),
        }
    }
}

/// A prior exchange judged relevant to the current utterance.
#[derive(Clone, Debug, Serialize)]
pub struct ContextSnippet {
    pub role: Role,
    pub text: String,
    pub similarity: f32,
}

/// Background writes still in flight, per tenant. Each write holds a token
/// that is cancelled when it finishes, so a waiter can snapshot the tokens
/// queued so far and ignore anything queued after.
#[derive(Default)]
struct PendingWrites {
    next_seq: AtomicU64,
    by_tenant: Mutex<HashMap<TenantIdentity, HashMap<u64, CancellationToken>>>,
}

impl PendingWrites {
    fn begin(self: &Arc<Self>, tenant: &TenantIdentity) -> WriteGuard {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let done = CancellationToken::new();
        let _ = self
            .by_tenant
            .lock()
            .entry(tenant.clone())
            .or_default()
            .insert(seq, done.clone());
        WriteGuard {
            pending: Arc::clone(self),
            tenant: tenant.clone(),
            seq,
            done,
        }
    }

    fn snapshot(&self, matches: impl Fn(&TenantIdentity) -> bool) -> Vec<CancellationToken> {
        self.by_tenant
            .lock()
            .iter()
            .filter(|(tenant, _)| matches(tenant))
            .flat_map(|(_, writes)| writes.values().cloned())
            .collect()
    }

    fn count(&self) -> usize {
        self.by_tenant.lock().values().map(HashMap::len).sum()
    }
}

/// Marks one write finished when dropped, including on panic.
struct WriteGuard {
    pending: Arc<PendingWrites>,
    tenant: TenantIdentity,
    seq: u64,
    done: CancellationToken,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let mut by_tenant = self.pending.by_tenant.lock();
        if let Some(writes) = by_tenant.get_mut(&self.tenant) {
            let _ = writes.remove(&self.seq);
            if writes.is_empty() {
                let _ = by_tenant.remove(&self.tenant);
            }
        }
        drop(by_tenant);
        self.done.cancel();
    }
}

async fn wait_all(tokens: Vec<CancellationToken>) {
    let _ = join_all(tokens.iter().map(CancellationToken::cancelled)).await;
}

/// Retrieve-then-store around every model call.
///
/// Retrieval never fails the turn: embedding or store errors degrade to an
/// empty result. Writes run as tracked background tasks. A delete waits only
/// for the affected tenant's writes already queued ([`drain_tenant`],
/// [`drain_primary`]); [`shutdown`] waits for everything.
///
/// [`drain_tenant`]: ContextPipeline::drain_tenant
/// [`drain_primary`]: ContextPipeline::drain_primary
/// [`shutdown`]: ContextPipeline::shutdown
#[derive(Clone)]
pub struct ContextPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn DocumentStore>,
    config: ContextConfig,
    tracker: TaskTracker,
    pending: Arc<PendingWrites>,
}

impl ContextPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn DocumentStore>,
        config: ContextConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
            tracker: TaskTracker::new(),
            pending: Arc::new(PendingWrites::default()),
        }
    }

    pub fn store_handle(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    async fn embed(&self, text: &str, task: EmbedTask) -> Option<Vec<f32>> {
        let timeout = self.config.embed_timeout;
        match tokio::time::timeout(timeout, self.embedder.embed(text, task)).await {
            Ok(Ok(v)) => Some(v),
            Ok(Err(e)) => {
                warn!(task = task.as_str(), error_kind = e.error_kind(), error = %e, "embedding failed");
                None
            }
            Err(_) => {
                warn!(task = task.as_str(), timeout_ms = timeout.as_millis() as u64, "embedding timed out");
                None
            }
        }
    }

    /// Up to `top_k` of the tenant's records most similar to `utterance`.
    pub async fn retrieve(&self, tenant: &TenantIdentity, utterance: &str) -> Vec<ContextSnippet> {
        let Some(embedding) = self.embed(utterance, EmbedTask::Query).await else {
            return Vec::new();
        };
        match self.store.query_similar(
            tenant,
            &embedding,
            self.config.top_k,
            self.config.similarity_threshold,
        ) {
            Ok(hits) => {
                debug!(tenant = %tenant, hits = hits.len(), "context retrieved");
                hits.into_iter()
                    .map(|h| ContextSnippet {
                        role: h.record.role,
                        text: h.record.text,
                        similarity: h.similarity,
                    })
                    .collect()
            }
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "context query failed");
                Vec::new()
            }
        }
    }

    /// The tenant's latest `recent_window` records, oldest first.
    pub fn recent(&self, tenant: &TenantIdentity) -> Vec<ConversationRecord> {
        self.history(tenant, self.config.recent_window)
    }

    pub fn history(&self, tenant: &TenantIdentity, limit: usize) -> Vec<ConversationRecord> {
        match self.store.history(tenant, limit) {
            Ok(records) => records,
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "history query failed");
                Vec::new()
            }
        }
    }

    /// Embed and persist one side of an exchange. When embedding fails the
    /// record is kept without a vector: it still shows in history but never
    /// matches a similarity query.
    pub async fn store(&self, tenant: TenantIdentity, role: Role, text: String) {
        let embedding = self
            .embed(&text, EmbedTask::Document)
            .await
            .unwrap_or_default();
        let record = ConversationRecord::new(tenant, role, text, embedding);
        match self.store.upsert(&record) {
            Ok(()) => debug!(tenant = %record.tenant, role = %role, id = %record.id, "record stored"),
            Err(e) => warn!(tenant = %record.tenant, role = %role, error = %e, "record store failed"),
        }
    }

    /// Spawn [`store`](Self::store) as a tracked background task.
    pub fn store_detached(&self, tenant: TenantIdentity, role: Role, text: String) {
        let guard = self.pending.begin(&tenant);
        let this = self.clone();
        let _ = self.tracker.spawn(async move {
            let _guard = guard;
            this.store(tenant, role, text).await;
        });
    }

    /// Wait for the tenant's writes queued before this call. Writes queued
    /// afterwards, and other tenants' writes, are not waited on.
    pub async fn drain_tenant(&self, tenant: &TenantIdentity) {
        wait_all(self.pending.snapshot(|t| t == tenant)).await;
    }

    /// Like [`drain_tenant`](Self::drain_tenant), across every
    /// sub-identity owned by `primary`.
    pub async fn drain_primary(&self, primary: &str) {
        wait_all(self.pending.snapshot(|t| t.belongs_to(primary))).await;
    }

    /// Wait for every write queued before this call, across all tenants.
    pub async fn drain(&self) {
        wait_all(self.pending.snapshot(|_| true)).await;
    }

    /// Stop tracking new writes and wait for the outstanding ones. Used at
    /// process shutdown.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.count()
    }
}
