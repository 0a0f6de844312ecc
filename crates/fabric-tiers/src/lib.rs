mod l1;
mod l2;
mod l3;

pub use l1::L1Adapter;
pub use l2::L2Adapter;
pub use l3::L3Adapter;

use async_trait::async_trait;
use fabric_base::{Result, Ttl};

/// The uniform surface every tier presents to the cache engine (§4.3). Each
/// adapter also exposes its native handle for operations this surface
/// cannot express (e.g. L3's version-checked entity writes).
#[async_trait]
pub trait TierAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Ttl>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomic get-or-insert; only materializes `value` when `key` was absent.
    async fn compute_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Ttl>) -> Result<Vec<u8>>;
}
