use async_trait::async_trait;
use fabric_base::{Error, Result, Ttl};

/// Opaque, monotonic, totally-ordered identifier for a stream-bus entry
/// within a single stream (§4.6). Only comparisons and display are
/// meaningful to callers — never arithmetic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct EntryId(pub u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One append on the stream bus (§4.6, §6.2).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub entry_id: EntryId,
    pub action: String,
    pub payload: String,
    pub published_millis: u64,
    pub ttl_millis: u64,
}

impl LogEntry {
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis.saturating_sub(self.published_millis) > self.ttl_millis
    }
}

/// The shared in-memory store backing L2 (§6.1) and the stream-bus
/// transport (§6.2). A single implementation serves both concerns, as the
/// spec requires: "the same shared in-memory store exposes an ordered
/// append-only log per fabric".
///
/// One implementation (backed by `redis`) is provided behind the
/// `live-backends` feature; [`crate::fake::FakeSharedStore`] is always
/// available and is what the fabric's own test suite runs against.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Ttl>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomic get-or-insert: if absent, the TTL passed at first creation is
    /// armed; a key that already exists is returned as-is and its TTL is
    /// left untouched (§4.2's "re-incrementing must not re-arm the TTL").
    async fn compute_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Ttl>,
    ) -> Result<Vec<u8>>;

    /// Atomic increment of an integer counter. TTL, if given, is armed only
    /// when the counter does not already exist (single round-trip).
    async fn incr(&self, key: &str, ttl: Option<Ttl>) -> Result<i64>;

    /// Attempts to acquire a leased, named lock: succeeds (`true`) iff the
    /// key was absent, in which case it is set to `token` with TTL `lease`.
    async fn try_acquire_lease(&self, key: &str, token: &str, lease: Ttl) -> Result<bool>;

    /// Releases a lease iff the stored token still matches `token`
    /// (compare-and-delete) — rejects release from non-owners per §4.1.
    async fn release_lease(&self, key: &str, token: &str) -> Result<bool>;

    /// Appends an entry to the named stream's ordered log.
    async fn log_append(
        &self,
        stream: &str,
        action: &str,
        payload: &str,
        ttl: Ttl,
        published_millis: u64,
    ) -> Result<LogEntry>;

    /// Reads entries strictly after `after` (or from the start, if `None`),
    /// in publish order, up to `limit` entries.
    async fn log_read_from(
        &self,
        stream: &str,
        after: Option<EntryId>,
        limit: usize,
    ) -> Result<Vec<LogEntry>>;

    /// Physically removes an entry. Safe to call concurrently from multiple
    /// consumers; removing an already-trimmed entry is a no-op.
    async fn log_trim(&self, stream: &str, entry_id: EntryId) -> Result<()>;
}

pub(crate) fn unavailable(tier: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::TierUnavailable {
        tier,
        source: anyhow::Error::new(source),
    }
}
