//! Drives the periodic persistence task on its own schedule, independent of
//! whatever is calling into the cache engine directly.

use crate::CacheEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Owns the background loop that calls [`CacheEngine::persist_cycle`] on a
/// fixed period until shutdown.
pub struct PersistenceSupervisor {
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl PersistenceSupervisor {
    pub fn spawn(engine: Arc<CacheEngine>, period: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let loop_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_shutdown.cancelled() => return,
                    _ = tokio::time::sleep(period) => {
                        engine.persist_cycle().await;
                    }
                }
            }
        });
        Self { shutdown, handle }
    }

    /// Signals the loop to stop after finishing any cycle in progress, and
    /// waits for it to actually exit (§4.7's bounded shutdown drain).
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheEngineConfig;
    use fabric_base::EntityId;
    use fabric_lock::LockManager;
    use fabric_model::EntityRecord;
    use fabric_retry::LocalRetryCounter;
    use fabric_store::fake::{FakeDocumentStore, FakeSharedStore};

    #[tokio::test]
    async fn periodic_cycle_eventually_persists_a_write() {
        let engine = Arc::new(CacheEngine::new(
            Arc::new(FakeSharedStore::new()),
            Arc::new(FakeDocumentStore::new()),
            LockManager::local(),
            Arc::new(LocalRetryCounter::new()),
            None,
            CacheEngineConfig {
                persistence_period: Duration::from_millis(20),
                ..CacheEngineConfig::default()
            },
        ));

        let id = EntityId::new();
        engine.write(EntityRecord::new_player(id)).await.unwrap();

        let supervisor = PersistenceSupervisor::spawn(engine.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        supervisor.shutdown().await;

        assert!(engine.read(id).await.unwrap().is_some());
    }
}
