//! Fabrics, indexed by name (§5): creation takes the write lock, lookup
//! takes the read lock.

use crate::{FabricHandle, FabricOptions};
use fabric_base::{Error, Result};
use fabric_bus::StreamBus;
use fabric_cache::{CacheEngine, CacheEngineConfig, PersistenceSupervisor};
use fabric_lock::LockManager;
use fabric_retry::SharedRetryCounter;
use fabric_store::{DocumentStore, IndexConfig, SharedStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A name's slot in the registry: reserved while a fabric is still being
/// built (spawning its cache engine and background tasks is not atomic),
/// then promoted to `Ready` once the handle actually exists. `get_by_name`
/// only ever sees `Ready` slots — a handle is never visible to lookups
/// before its background tasks exist.
enum Slot {
    Reserved,
    Ready(Arc<FabricHandle>),
}

/// Owns every fabric running on this node. Creation is rare and exclusive;
/// lookup is the hot path and only needs shared access.
#[derive(Default)]
pub struct FabricRegistry {
    fabrics: RwLock<HashMap<String, Slot>>,
}

impl FabricRegistry {
    pub fn new() -> Self {
        Self { fabrics: RwLock::new(HashMap::new()) }
    }

    /// Creates and starts a new fabric: wires up the tiered cache engine,
    /// a stream bus over `l2`, the periodic persistence supervisor, and the
    /// bus consumer loop, then registers it under `name`.
    ///
    /// `name` is reserved under the write lock before any of that
    /// construction happens (§5: "creation takes the write lock"), and the
    /// reservation-check is a single atomic step so two concurrent
    /// `create` calls for the same name cannot both succeed — the loser
    /// observes `Error::DuplicateName` instead of silently overwriting the
    /// winner's already-running fabric. The reservation is released if
    /// construction fails partway through.
    ///
    /// L2 is cluster-wide, so the per-id lock defaults to the distributed
    /// backend over `l2` rather than the local one — a single node holding
    /// a local-only lock would not actually exclude the rest of the fleet.
    pub async fn create(
        &self,
        name: impl Into<String>,
        l2: Arc<dyn SharedStore>,
        l3: Arc<dyn DocumentStore>,
        index_config: IndexConfig,
        options: FabricOptions,
    ) -> Result<Arc<FabricHandle>> {
        let name = name.into();

        {
            let mut fabrics = self.fabrics.write().await;
            if fabrics.contains_key(&name) {
                return Err(Error::DuplicateName(name));
            }
            fabrics.insert(name.clone(), Slot::Reserved);
        }

        match self.build_fabric(&name, l2, l3, index_config, options).await {
            Ok(handle) => {
                self.fabrics.write().await.insert(name, Slot::Ready(handle.clone()));
                Ok(handle)
            }
            Err(error) => {
                self.fabrics.write().await.remove(&name);
                Err(error)
            }
        }
    }

    async fn build_fabric(
        &self,
        name: &str,
        l2: Arc<dyn SharedStore>,
        l3: Arc<dyn DocumentStore>,
        index_config: IndexConfig,
        options: FabricOptions,
    ) -> Result<Arc<FabricHandle>> {
        l3.ensure_indexes(&index_config).await?;

        let bus = Arc::new(StreamBus::new(name.to_string(), l2.clone()));
        let locks = LockManager::shared(l2.clone());
        let retries = Arc::new(SharedRetryCounter::new(l2.clone()));

        let engine_config = CacheEngineConfig {
            l1_idle_ttl: options.l1_ttl,
            l2_ttl: options.l2_ttl,
            persistence_period: options.persistence_period,
            persistence_batch: options.persistence_batch,
            sync_concurrency: options.consumer_parallelism,
            max_sync_attempts: options.max_sync_attempts,
            lock_wait: options.lock_wait,
            lock_lease: options.lock_lease,
            ..CacheEngineConfig::default()
        };

        let engine = Arc::new(CacheEngine::new(l2, l3, locks, retries, Some(bus.clone()), engine_config));

        let persistence = PersistenceSupervisor::spawn(engine.clone(), options.persistence_period);

        let consumer_shutdown = CancellationToken::new();
        tokio::spawn(
            bus.clone()
                .run_consumer_loop(options.persistence_period, consumer_shutdown.clone()),
        );

        Ok(Arc::new(FabricHandle::new(
            name.to_string(),
            engine,
            persistence,
            consumer_shutdown,
            options.drain_timeout,
        )))
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Arc<FabricHandle>> {
        match self.fabrics.read().await.get(name) {
            Some(Slot::Ready(handle)) => Some(handle.clone()),
            Some(Slot::Reserved) | None => None,
        }
    }

    /// Unregisters `name` and drains it. Once removed, `get_by_name` can no
    /// longer see it even while the drain is still in progress.
    pub async fn shutdown(&self, name: &str) {
        let slot = self.fabrics.write().await.remove(name);
        if let Some(Slot::Ready(handle)) = slot {
            handle.shutdown().await;
        }
    }

    pub async fn shutdown_all(&self) {
        let handles: Vec<Arc<FabricHandle>> = self
            .fabrics
            .write()
            .await
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Ready(handle) => Some(handle),
                Slot::Reserved => None,
            })
            .collect();
        for handle in handles {
            handle.shutdown().await;
        }
    }
}
