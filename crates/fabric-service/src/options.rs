use fabric_base::Ttl;
use std::time::Duration;

/// Options accepted by [`crate::FabricRegistry::create`] (§4.7). Index
/// configuration is passed to `create` separately, since it describes the
/// L3 schema rather than a per-fabric runtime tuning knob.
#[derive(Clone, Debug)]
pub struct FabricOptions {
    pub l1_ttl: Duration,
    pub l2_ttl: Ttl,
    pub persistence_period: Duration,
    pub persistence_batch: usize,
    pub max_sync_attempts: u32,
    pub consumer_parallelism: usize,
    pub lock_wait: Duration,
    pub lock_lease: Duration,
    /// Bound on `shutdown()`'s drain window (§5, default 30s).
    pub drain_timeout: Duration,
}

impl Default for FabricOptions {
    fn default() -> Self {
        Self {
            l1_ttl: Duration::from_secs(30 * 60),
            l2_ttl: Ttl::from_millis(24 * 60 * 60 * 1000).expect("24h is within the 7-day ceiling"),
            persistence_period: Duration::from_secs(60),
            persistence_batch: 1_000,
            max_sync_attempts: 5,
            consumer_parallelism: 16,
            lock_wait: Duration::from_secs(5),
            lock_lease: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
        }
    }
}
