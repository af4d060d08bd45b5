use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use pipelink_frame::Deadline;
use pipelink_transport::PipeEndpoint;
use serde_json::Value;

use crate::error::Result;
use crate::outbound::ConnectSettings;
use crate::pool::ChannelPool;

/// Endpoint → pool map.
///
/// Pools are keyed by the canonical `name@host`, so local aliases (`.`,
/// `localhost`) share one pool. The map lock is held only to find, create
/// or remove a pool, never across pool operations.
pub struct ChannelManager {
    settings: Arc<ConnectSettings>,
    capacity: usize,
    pools: RwLock<HashMap<String, Arc<ChannelPool>>>,
}

impl ChannelManager {
    pub fn new(settings: Arc<ConnectSettings>, capacity_per_endpoint: usize) -> Self {
        Self {
            settings,
            capacity: capacity_per_endpoint,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// The pool for `endpoint`, created on first use.
    pub fn pool(&self, endpoint: &PipeEndpoint) -> Arc<ChannelPool> {
        let endpoint = self.settings.namespace.canonicalize(endpoint);
        let key = endpoint.instance_id();

        if let Some(pool) = self.read_pools().get(&key) {
            return Arc::clone(pool);
        }

        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        let pool = pools.entry(key).or_insert_with(|| {
            tracing::debug!(endpoint = %endpoint, "creating channel pool");
            Arc::new(ChannelPool::new(
                endpoint.clone(),
                Arc::clone(&self.settings),
                self.capacity,
            ))
        });
        Arc::clone(pool)
    }

    /// Existing pool for `endpoint`, if any.
    pub fn get(&self, endpoint: &PipeEndpoint) -> Option<Arc<ChannelPool>> {
        let key = self.settings.namespace.canonicalize(endpoint).instance_id();
        self.read_pools().get(&key).cloned()
    }

    pub async fn request(
        &self,
        endpoint: &PipeEndpoint,
        payload: &[u8],
        deadline: Deadline,
    ) -> Result<Option<Value>> {
        self.pool(endpoint).request(payload, deadline).await
    }

    pub async fn send(&self, endpoint: &PipeEndpoint, payload: &[u8], deadline: Deadline) -> Result<()> {
        self.pool(endpoint).send(payload, deadline).await
    }

    /// Close and forget the pool for `endpoint`. The next call reconnects
    /// from scratch. Returns whether a pool existed.
    pub async fn reset_pool(&self, endpoint: &PipeEndpoint) -> bool {
        let key = self.settings.namespace.canonicalize(endpoint).instance_id();
        let removed = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);

        match removed {
            Some(pool) => {
                tracing::debug!(endpoint = %key, "resetting channel pool");
                pool.close().await;
                true
            }
            None => false,
        }
    }

    /// Close and forget every pool.
    pub async fn close_all(&self) {
        let pools: Vec<Arc<ChannelPool>> = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, pool)| pool)
            .collect();
        for pool in pools {
            pool.close().await;
        }
    }

    pub fn pool_count(&self) -> usize {
        self.read_pools().len()
    }

    fn read_pools(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ChannelPool>>> {
        self.pools.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("capacity", &self.capacity)
            .field("pools", &self.pool_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pipelink_frame::Timeout;
    use pipelink_transport::PipeNamespace;

    use super::*;
    use crate::handshake::DEFAULT_MAX_HANDSHAKE_PAYLOAD;
    use crate::identity::ProcessIdentity;

    fn manager() -> ChannelManager {
        let settings = Arc::new(ConnectSettings {
            namespace: PipeNamespace::with_local_host("/tmp/plmgr-unused", "node-a"),
            identity: ProcessIdentity::new("tester", "0.1.0", "node-a"),
            local_pipe: "caller".to_string(),
            connect_timeout: Timeout::secs(1),
            max_payload_size: pipelink_frame::DEFAULT_MAX_PAYLOAD,
            max_handshake_payload: DEFAULT_MAX_HANDSHAKE_PAYLOAD,
        });
        ChannelManager::new(settings, 3)
    }

    #[test]
    fn local_aliases_share_one_pool() {
        let manager = manager();
        let a = manager.pool(&PipeEndpoint::local("svc").unwrap());
        let b = manager.pool(&PipeEndpoint::new("node-a", "svc").unwrap());
        let c = manager.pool(&PipeEndpoint::new("localhost", "svc").unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(a.endpoint().instance_id(), "svc@node-a");
        assert_eq!(a.stats().capacity, 3);
        assert_eq!(manager.pool_count(), 1);

        manager.pool(&PipeEndpoint::local("other").unwrap());
        assert_eq!(manager.pool_count(), 2);
    }

    #[tokio::test]
    async fn reset_pool_replaces_pool() {
        let manager = manager();
        let endpoint = PipeEndpoint::local("svc").unwrap();
        let before = manager.pool(&endpoint);

        assert!(manager.reset_pool(&endpoint).await);
        assert!(before.is_closed());
        assert!(manager.get(&endpoint).is_none());
        assert!(!manager.reset_pool(&endpoint).await);

        let after = manager.pool(&endpoint);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn close_all_empties_the_map() {
        let manager = manager();
        let a = manager.pool(&PipeEndpoint::local("a").unwrap());
        manager.pool(&PipeEndpoint::local("b").unwrap());
        manager.close_all().await;
        assert_eq!(manager.pool_count(), 0);
        assert!(a.is_closed());
    }
}
