use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use juno_core::tenant::TenantIdentity;
use juno_core::tools::{ToolClient, ToolConnector, ToolError};

/// Registry of live tool clients, one per tenant identity.
#[async_trait]
pub trait ClientPool: Send + Sync {
    /// Return the tenant's client, creating it on first use.
    async fn acquire(&self, tenant: &TenantIdentity) -> Result<Arc<dyn ToolClient>, ToolError>;

    /// Close and forget the tenant's client. Returns whether one existed.
    async fn release(&self, tenant: &TenantIdentity) -> bool;

    /// Release every client owned by `primary`. Returns how many were released.
    async fn release_primary(&self, primary: &str) -> usize;

    /// Release everything. Used at shutdown.
    async fn release_all(&self) -> usize;

    fn active_count(&self) -> usize;
}

/// Get-or-create pool keyed by [`TenantIdentity`].
///
/// The registry lock only guards map reads and inserts. Client construction
/// and teardown run unlocked, so a slow handshake for one tenant never blocks
/// another. When two tasks race to create the same tenant's client, the
/// first insert wins and the loser's client is closed.
pub struct SessionPool {
    connector: Arc<dyn ToolConnector>,
    clients: Mutex<HashMap<TenantIdentity, Arc<dyn ToolClient>>>,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn ToolConnector>) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn close_all(clients: Vec<Arc<dyn ToolClient>>) -> usize {
        let count = clients.len();
        let _ = join_all(clients.iter().map(|c| c.close())).await;
        count
    }
}

#[async_trait]
impl ClientPool for SessionPool {
    async fn acquire(&self, tenant: &TenantIdentity) -> Result<Arc<dyn ToolClient>, ToolError> {
        let existing = self.clients.lock().get(tenant).cloned();
        if let Some(client) = existing {
            return Ok(client);
        }

        debug!(tenant = %tenant, "creating tool client");
        let created = match self.connector.connect(tenant).await {
            Ok(client) => client,
            Err(e) => {
                warn!(tenant = %tenant, error_kind = e.error_kind(), error = %e, "tool client construction failed");
                return Err(e);
            }
        };

        let (client, loser) = {
            let mut clients = self.clients.lock();
            match clients.get(tenant) {
                Some(winner) => (Arc::clone(winner), Some(created)),
                None => {
                    let _ = clients.insert(tenant.clone(), Arc::clone(&created));
                    (created, None)
                }
            }
        };

        match loser {
            Some(loser) => {
                debug!(tenant = %tenant, "lost creation race, closing duplicate client");
                loser.close().await;
            }
            None => info!(tenant = %tenant, session = ?client.session_token(), "tool client registered"),
        }
        Ok(client)
    }

    async fn release(&self, tenant: &TenantIdentity) -> bool {
        let removed = self.clients.lock().remove(tenant);
        match removed {
            Some(client) => {
                client.close().await;
                info!(tenant = %tenant, "tool client released");
                true
            }
            None => false,
        }
    }

    async fn release_primary(&self, primary: &str) -> usize {
        let removed = {
            let mut clients = self.clients.lock();
            let mut removed = Vec::new();
            clients.retain(|tenant, client| {
                if tenant.belongs_to(primary) {
                    removed.push(Arc::clone(client));
                    false
                } else {
                    true
                }
            });
            removed
        };
        let count = Self::close_all(removed).await;
        info!(primary, released = count, "released tool clients for primary identity");
        count
    }

    async fn release_all(&self) -> usize {
        let removed: Vec<_> = self.clients.lock().drain().map(|(_, c)| c).collect();
        let count = Self::close_all(removed).await;
        info!(released = count, "released all tool clients");
        count
    }

    fn active_count(&self) -> usize {
        self.clients.lock().len()
    }
}
