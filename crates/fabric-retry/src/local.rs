//! In-process retry counter. `DashMap` has no native per-key TTL, so a
//! background sweep task periodically purges expired entries; reads also
//! lazily treat an expired entry as absent regardless of the sweep's cadence.

use crate::RetryCounter;
use async_trait::async_trait;
use dashmap::DashMap;
use fabric_base::{Result, Ttl};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Entry {
    count: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct LocalRetryCounter {
    entries: Arc<DashMap<String, Entry>>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl LocalRetryCounter {
    pub fn new() -> Self {
        let entries: Arc<DashMap<String, Entry>> = Arc::new(DashMap::new());
        let sweep_target = entries.clone();
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let now = Instant::now();
                sweep_target.retain(|_, entry| !entry.is_expired(now));
            }
        });
        Self { entries, sweeper }
    }
}

impl Default for LocalRetryCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalRetryCounter {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[async_trait]
impl RetryCounter for LocalRetryCounter {
    async fn increment(&self, key: &str, ttl: Option<Ttl>) -> Result<i64> {
        let now = Instant::now();
        let mut fresh = false;
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            fresh = true;
            Entry { count: 0, expires_at: None }
        });

        if entry.is_expired(now) {
            entry.count = 0;
            entry.expires_at = None;
            fresh = true;
        }

        entry.count += 1;
        if fresh {
            entry.expires_at = ttl.map(|t| now + t.as_duration());
        }
        Ok(entry.count)
    }

    async fn get(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(entry.count),
            Some(_) => {
                self.entries.remove(key);
                Ok(0)
            }
            None => Ok(0),
        }
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increment_arms_ttl_only_on_first_creation() {
        let counter = LocalRetryCounter::new();
        let ttl = Ttl::from_millis(2_000).unwrap();
        assert_eq!(counter.increment("c", Some(ttl)).await.unwrap(), 1);
        assert_eq!(counter.increment("c", Some(ttl)).await.unwrap(), 2);
        assert!(counter.exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn ttl_eviction_resets_the_counter() {
        let counter = LocalRetryCounter::new();
        let ttl = Ttl::from_millis(50).unwrap();
        counter.increment("c", Some(ttl)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!counter.exists("c").await.unwrap());
        assert_eq!(counter.get("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_deletes_the_counter_immediately() {
        let counter = LocalRetryCounter::new();
        counter.increment("c", None).await.unwrap();
        counter.reset("c").await.unwrap();
        assert_eq!(counter.get("c").await.unwrap(), 0);
        assert!(!counter.exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn increment_without_ttl_never_expires() {
        let counter = LocalRetryCounter::new();
        for _ in 0..5 {
            counter.increment("c", None).await.unwrap();
        }
        assert_eq!(counter.get("c").await.unwrap(), 5);
    }
}
