//! L1 adapter: a bounded, idle-TTL in-process cache (§4.3). Eviction is
//! best-effort and governed globally by the adapter's construction
//! parameters, not per-call — `put`'s `ttl` argument is accepted for
//! uniformity with the other tiers but has no effect here.

use crate::TierAdapter;
use async_trait::async_trait;
use fabric_base::{Result, Ttl};
use std::time::Duration;

pub struct L1Adapter {
    cache: moka::sync::Cache<String, Vec<u8>>,
}

impl L1Adapter {
    /// `max_capacity` bounds the number of entries; `idle_ttl` evicts an
    /// entry that has not been read or written for that long (§4.5: default
    /// 30 minutes).
    pub fn new(max_capacity: u64, idle_ttl: Duration) -> Self {
        let cache = moka::sync::Cache::builder()
            .max_capacity(max_capacity)
            .time_to_idle(idle_ttl)
            .build();
        Self { cache }
    }

    /// Native handle, for snapshot iteration the uniform surface doesn't
    /// expose (e.g. the periodic L1→L2 sync sweep in `fabric-cache`).
    pub fn native(&self) -> &moka::sync::Cache<String, Vec<u8>> {
        &self.cache
    }
}

#[async_trait]
impl TierAdapter for L1Adapter {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.get(key))
    }

    async fn put(&self, key: &str, value: Vec<u8>, _ttl: Option<Ttl>) -> Result<()> {
        self.cache.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.cache.contains_key(key))
    }

    async fn compute_if_absent(&self, key: &str, value: Vec<u8>, _ttl: Option<Ttl>) -> Result<Vec<u8>> {
        Ok(self.cache.get_with(key.to_string(), || value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let l1 = L1Adapter::new(100, Duration::from_secs(60));
        l1.put("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(l1.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(l1.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn compute_if_absent_only_materializes_once() {
        let l1 = L1Adapter::new(100, Duration::from_secs(60));
        let first = l1.compute_if_absent("k", b"one".to_vec(), None).await.unwrap();
        let second = l1.compute_if_absent("k", b"two".to_vec(), None).await.unwrap();
        assert_eq!(first, b"one".to_vec());
        assert_eq!(second, b"one".to_vec());
    }

    #[tokio::test]
    async fn remove_evicts_the_entry() {
        let l1 = L1Adapter::new(100, Duration::from_secs(60));
        l1.put("k", b"v".to_vec(), None).await.unwrap();
        l1.remove("k").await.unwrap();
        assert_eq!(l1.get("k").await.unwrap(), None);
    }
}
