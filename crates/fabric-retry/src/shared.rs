//! Shared-store-backed retry counter (§4.2), for attempt tracking that must
//! be visible fleet-wide rather than per-process.

use crate::RetryCounter;
use async_trait::async_trait;
use fabric_base::{Result, Ttl};
use fabric_store::SharedStore;
use std::sync::Arc;

pub struct SharedRetryCounter {
    store: Arc<dyn SharedStore>,
}

impl SharedRetryCounter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RetryCounter for SharedRetryCounter {
    async fn increment(&self, key: &str, ttl: Option<Ttl>) -> Result<i64> {
        self.store.incr(key, ttl).await
    }

    async fn get(&self, key: &str) -> Result<i64> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.store.remove(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.store.exists(key).await
    }
}
