use fabric_base::Ttl;
use std::time::Duration;

/// Tunables for a single fabric's cache engine (§4.5, §4.7 `create` options).
#[derive(Clone, Debug)]
pub struct CacheEngineConfig {
    pub l1_max_capacity: u64,
    /// L1 idle-TTL; default 30 minutes (§4.5).
    pub l1_idle_ttl: Duration,
    /// L2 per-key TTL; default 24 hours (§4.5).
    pub l2_ttl: Ttl,
    /// How often the periodic persistence task runs.
    pub persistence_period: Duration,
    /// Max records a single L2→L3 persistence run will flush (§4.5 default 1000).
    pub persistence_batch: usize,
    /// Bounded concurrency for the L1→L2 sync sweep (§4.5 default 16).
    pub sync_concurrency: usize,
    /// Max attempts before an L1→L2 sync raises `PersistenceExhausted` (default 5).
    pub max_sync_attempts: u32,
    pub lock_wait: Duration,
    pub lock_lease: Duration,
}

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self {
            l1_max_capacity: 10_000,
            l1_idle_ttl: Duration::from_secs(30 * 60),
            l2_ttl: Ttl::from_millis(24 * 60 * 60 * 1000).expect("24h is within the 7-day ceiling"),
            persistence_period: Duration::from_secs(60),
            persistence_batch: 1_000,
            sync_concurrency: 16,
            max_sync_attempts: 5,
            lock_wait: Duration::from_secs(5),
            lock_lease: Duration::from_secs(10),
        }
    }
}
