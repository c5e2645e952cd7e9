//! Transport clients keyed by execution context.
//!
//! Every concurrently running test execution gets its own client and
//! subprocess. Clients are created on first use and torn down explicitly
//! with [`TransportRegistry::release`].

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use vigil_core::ids::ExecutionId;

use crate::client::{ToolTransport, TransportConfig};

/// `ExecutionId → ToolTransport` table.
pub struct TransportRegistry {
    config: TransportConfig,
    clients: DashMap<ExecutionId, Arc<ToolTransport>>,
}

impl TransportRegistry {
    /// Registry whose clients all use `config`.
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    /// Client for `id`, created if absent. The process starts lazily.
    pub fn get_or_create(&self, id: &ExecutionId) -> Arc<ToolTransport> {
        let entry = self.clients.entry(id.clone()).or_insert_with(|| {
            debug!(execution_id = %id, "creating transport client");
            Arc::new(ToolTransport::new(self.config.clone()))
        });
        Arc::clone(entry.value())
    }

    /// Existing client for `id`.
    pub fn get(&self, id: &ExecutionId) -> Option<Arc<ToolTransport>> {
        self.clients.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Remove the client for `id` and stop its process.
    /// Returns `false` if none existed.
    pub async fn release(&self, id: &ExecutionId) -> bool {
        let Some((_, client)) = self.clients.remove(id) else {
            return false;
        };
        client.shutdown().await;
        info!(execution_id = %id, "transport client released");
        true
    }

    /// Release every client.
    pub async fn shutdown_all(&self) {
        let ids: Vec<ExecutionId> = self.clients.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.release(&id).await;
        }
    }

    /// Number of live clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client exists.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_same_client() {
        let registry = TransportRegistry::new(TransportConfig::default());
        let id = ExecutionId::new();
        let a = registry.get_or_create(&id);
        let b = registry.get_or_create(&id);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_ids_distinct_clients() {
        let registry = TransportRegistry::new(TransportConfig::default());
        let a = registry.get_or_create(&ExecutionId::new());
        let b = registry.get_or_create(&ExecutionId::new());
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn release_removes_client() {
        let registry = TransportRegistry::new(TransportConfig::default());
        let id = ExecutionId::new();
        let _ = registry.get_or_create(&id);
        assert!(registry.release(&id).await);
        assert!(registry.get(&id).is_none());
        assert!(!registry.release(&id).await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_all_empties_registry() {
        let registry = TransportRegistry::new(TransportConfig::default());
        for _ in 0..3 {
            let _ = registry.get_or_create(&ExecutionId::new());
        }
        registry.shutdown_all().await;
        assert!(registry.is_empty());
    }
}
