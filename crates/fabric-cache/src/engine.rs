//! The tiered cache engine (§4.5): read-through across L1→L2→L3 with
//! double-checked locking, write-through L1 plus write-behind L2/L3, and
//! the background sync/persistence tasks that keep the tiers converged.

use crate::CacheEngineConfig;
use dashmap::DashSet;
use fabric_base::{EntityId, Error, Result, Ttl};
use fabric_lock::LockManager;
use fabric_model::EntityRecord;
use fabric_retry::RetryCounter;
use fabric_store::{DocumentStore, SharedStore};
use fabric_tiers::{L1Adapter, L2Adapter, L3Adapter, TierAdapter};
use std::sync::Arc;

pub struct CacheEngine {
    l1: L1Adapter,
    l2: L2Adapter,
    l3: L3Adapter,
    locks: LockManager,
    retries: Arc<dyn RetryCounter>,
    bus: Option<Arc<fabric_bus::StreamBus>>,
    /// Ids the engine has read or written, standing in for the key
    /// enumeration `SharedStore` deliberately does not expose — the
    /// periodic persistence sweep (§4.5) walks this set rather than
    /// scanning L2 directly.
    known_ids: DashSet<EntityId>,
    config: CacheEngineConfig,
}

impl CacheEngine {
    pub fn new(
        l2: Arc<dyn SharedStore>,
        l3: Arc<dyn DocumentStore>,
        locks: LockManager,
        retries: Arc<dyn RetryCounter>,
        bus: Option<Arc<fabric_bus::StreamBus>>,
        config: CacheEngineConfig,
    ) -> Self {
        Self {
            l1: L1Adapter::new(config.l1_max_capacity, config.l1_idle_ttl),
            l2: L2Adapter::new(l2),
            l3: L3Adapter::new(l3),
            locks,
            retries,
            bus,
            known_ids: DashSet::new(),
            config,
        }
    }

    fn encode(record: &EntityRecord) -> Result<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| Error::TierUnavailable {
            tier: "l1",
            source: anyhow::Error::new(e),
        })
    }

    fn decode(bytes: &[u8]) -> Result<EntityRecord> {
        serde_json::from_slice(bytes).map_err(|e| Error::TierUnavailable {
            tier: "l1",
            source: anyhow::Error::new(e),
        })
    }

    /// Read-through: L1, then L2, then L3, double-checked under the
    /// per-id lock so concurrent misses for the same id only populate the
    /// lower tiers once.
    pub async fn read(&self, id: EntityId) -> Result<Option<EntityRecord>> {
        self.known_ids.insert(id);
        let key = id.to_string();

        if let Some(bytes) = self.l1.get(&key).await? {
            return Ok(Some(Self::decode(&bytes)?));
        }

        let l1 = &self.l1;
        let l2 = &self.l2;
        let l3 = &self.l3;
        let l2_ttl = self.config.l2_ttl;
        let key_ref = key.as_str();

        self.locks
            .run_under_lock(&key, self.config.lock_wait, self.config.lock_lease, || async move {
                if let Some(bytes) = l1.get(key_ref).await? {
                    return Ok(Some(Self::decode(&bytes)?));
                }
                if let Some(bytes) = l2.get(key_ref).await? {
                    l1.put(key_ref, bytes.clone(), None).await?;
                    return Ok(Some(Self::decode(&bytes)?));
                }
                if let Some(record) = l3.native().get_entity(id).await? {
                    let bytes = Self::encode(&record)?;
                    l1.put(key_ref, bytes.clone(), None).await?;
                    l2.put(key_ref, bytes, Some(l2_ttl)).await?;
                    return Ok(Some(record));
                }
                Ok(None)
            })
            .await?
    }

    /// `readOrCreate`: returns the existing record if any tier has one,
    /// otherwise materializes `factory()` under the per-id lock so only
    /// one concurrent caller actually creates it.
    pub async fn read_or_create<F>(&self, id: EntityId, factory: F) -> Result<EntityRecord>
    where
        F: FnOnce() -> EntityRecord,
    {
        if let Some(existing) = self.read(id).await? {
            return Ok(existing);
        }

        let key = id.to_string();
        self.known_ids.insert(id);

        self.locks
            .run_under_lock(&key, self.config.lock_wait, self.config.lock_lease, || async {
                if let Some(bytes) = self.l2.get(&key).await? {
                    return Ok(Self::decode(&bytes)?);
                }
                if let Some(existing) = self.l3.native().get_entity(id).await? {
                    return Ok(existing);
                }
                let created = factory();
                let bytes = Self::encode(&created)?;
                self.l1.put(&key, bytes.clone(), None).await?;
                self.l2.put(&key, bytes, Some(self.config.l2_ttl)).await?;
                Ok(created)
            })
            .await?
    }

    /// Write-through to L1, then schedules the L1→L2 write-behind sync and
    /// (if a stream bus is configured) publishes a cross-node notification.
    pub async fn write(self: &Arc<Self>, record: EntityRecord) -> Result<()> {
        let id = record.id();
        self.known_ids.insert(id);
        let key = id.to_string();
        let bytes = Self::encode(&record)?;
        self.l1.put(&key, bytes, None).await?;

        if let Some(bus) = &self.bus {
            if let Err(error) = bus
                .publish(fabric_bus::PLAYER_DATA_SYNC_BY_ID, &id.to_string(), self.config.l2_ttl)
                .await
            {
                tracing::warn!(entity = %id, %error, "cross-node publish failed; L2/L3 still sync locally");
            }
        }

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(error) = engine.sync_l1_l2(id).await {
                tracing::warn!(entity = %id, %error, "write-behind L1->L2 sync failed");
            }
        });

        Ok(())
    }

    pub async fn remove(&self, id: EntityId) -> Result<()> {
        let key = id.to_string();
        self.l1.remove(&key).await?;
        self.l2.remove(&key).await?;
        self.l3.native().remove_entity(id).await?;
        self.known_ids.remove(&id);
        Ok(())
    }

    pub async fn publish(&self, action: &str, payload: &str, ttl: Ttl) -> Result<()> {
        match &self.bus {
            Some(bus) => {
                bus.publish(action, payload, ttl).await?;
                Ok(())
            }
            None => Err(Error::BusUnavailable(
                "no stream bus configured for this fabric".to_string(),
            )),
        }
    }

    pub fn register_accepter(&self, action: impl Into<String>, accepter: Arc<dyn fabric_bus::Accepter>) {
        if let Some(bus) = &self.bus {
            bus.register_accepter(action, accepter);
        }
    }

    /// Takes the L1 copy under the per-id lock, merges it into the L2 copy,
    /// and writes the result back to L2 (§4.4, §4.5). L2's copy is the
    /// merge base (`self` in `merge_from`'s terms) and the just-written L1
    /// copy is `other`: L1 is authoritative, so an attribute or
    /// relationship the caller deleted on L1 is not resurrected by a
    /// stale, still-present value sitting in L2. Failures are tracked by
    /// the retry counter under `sync-l1-l2:<id>`; exhausting
    /// `max_sync_attempts` raises `PersistenceExhausted`.
    pub async fn sync_l1_l2(&self, id: EntityId) -> Result<()> {
        let key = id.to_string();
        let key_ref = key.as_str();
        let l1 = &self.l1;
        let l2 = &self.l2;
        let l2_ttl = self.config.l2_ttl;

        let put_result: Option<Result<()>> = self
            .locks
            .run_under_lock(&key, self.config.lock_wait, self.config.lock_lease, || async move {
                let Some(l1_bytes) = l1.get(key_ref).await? else {
                    return Ok(None);
                };
                let l1_copy = Self::decode(&l1_bytes)?;

                let mut l2_copy = match l2.get(key_ref).await? {
                    Some(l2_bytes) => Self::decode(&l2_bytes)?,
                    None => l1_copy.clone(),
                };
                l2_copy.merge_from(&l1_copy);

                let encoded = Self::encode(&l2_copy)?;
                Ok(Some(l2.put(key_ref, encoded, Some(l2_ttl)).await))
            })
            .await??;

        let Some(put_result) = put_result else {
            return Ok(());
        };

        let retry_key = format!("sync-l1-l2:{id}");
        match put_result {
            Ok(()) => {
                self.retries.reset(&retry_key).await?;
                Ok(())
            }
            Err(error) => {
                let attempts = self.retries.increment(&retry_key, Some(self.config.l2_ttl)).await?;
                if attempts as u32 >= self.config.max_sync_attempts {
                    return Err(Error::PersistenceExhausted {
                        id: id.to_string(),
                        attempts: attempts as u32,
                    });
                }
                Err(error)
            }
        }
    }

    /// One periodic-persistence cycle (§4.5): sweeps known ids through
    /// `sync_l1_l2` with bounded concurrency, then flushes up to
    /// `persistence_batch` of them from L2 into L3.
    pub async fn persist_cycle(self: &Arc<Self>) {
        let ids: Vec<EntityId> = self.known_ids.iter().map(|entry| *entry).collect();

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.sync_concurrency.max(1)));
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids.iter().copied() {
            let engine = self.clone();
            let permit = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore is never closed");
                if let Err(error) = engine.sync_l1_l2(id).await {
                    tracing::warn!(entity = %id, %error, "periodic L1->L2 sync failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        for id in ids.into_iter().take(self.config.persistence_batch) {
            if let Err(error) = self.persist_to_l3(id).await {
                tracing::warn!(entity = %id, %error, "L2->L3 persistence failed");
            }
        }
    }

    /// Flushes one id from L2 into L3, preserving version ordering: on an
    /// optimistic-lock conflict, re-reads the current L3 copy, merges
    /// (§4.4), and retries a bounded number of times.
    async fn persist_to_l3(&self, id: EntityId) -> Result<()> {
        let key = id.to_string();
        let Some(l2_bytes) = self.l2.get(&key).await? else {
            return Ok(());
        };
        let mut candidate = Self::decode(&l2_bytes)?;

        for _ in 0..3 {
            let existing = self.l3.native().get_entity(id).await?;
            let expected_version = existing.as_ref().map(|r| r.version());
            if let Some(existing) = &existing {
                candidate.merge_from(existing);
            }
            match self.l3.native().put_entity(&candidate, expected_version).await {
                Ok(()) => return Ok(()),
                Err(Error::Conflict(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(Error::Conflict(id.to_string()))
    }
}
