mod local;
mod shared;

pub use local::LocalRetryCounter;
pub use shared::SharedRetryCounter;

use async_trait::async_trait;
use fabric_base::{Result, Ttl};

/// Per-key attempt counter (§4.2). Both implementations share identical
/// semantics: a TTL supplied at first creation is armed once and never
/// re-armed by later increments of the same key.
#[async_trait]
pub trait RetryCounter: Send + Sync {
    async fn increment(&self, key: &str, ttl: Option<Ttl>) -> Result<i64>;

    async fn get(&self, key: &str) -> Result<i64>;

    async fn reset(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}
