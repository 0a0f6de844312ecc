//! L2 adapter: a typed handle into the shared in-memory store (§4.3).

use crate::TierAdapter;
use async_trait::async_trait;
use fabric_base::{Result, Ttl};
use fabric_store::SharedStore;
use std::sync::Arc;

pub struct L2Adapter {
    store: Arc<dyn SharedStore>,
}

impl L2Adapter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub fn native(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }
}

#[async_trait]
impl TierAdapter for L2Adapter {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Ttl>) -> Result<()> {
        self.store.put(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.store.exists(key).await
    }

    async fn compute_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Ttl>) -> Result<Vec<u8>> {
        self.store.compute_if_absent(key, value, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_store::fake::FakeSharedStore;

    #[tokio::test]
    async fn delegates_directly_to_the_shared_store() {
        let l2 = L2Adapter::new(Arc::new(FakeSharedStore::new()));
        l2.put("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(l2.get("k").await.unwrap(), Some(b"v".to_vec()));
        l2.remove("k").await.unwrap();
        assert!(!l2.exists("k").await.unwrap());
    }
}
