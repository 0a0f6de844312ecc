/// The normalized error taxonomy surfaced by every fabric component.
///
/// Tier adapters (`fabric-tiers`) are responsible for converting native
/// backend errors (redis, mongodb) into one of these variants at the
/// boundary; no native error type should escape past that layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key `{0}` was not found in any tier")]
    NotFound(String),

    #[error("timed out waiting for lock on `{0}`")]
    LockTimeout(String),

    #[error("interrupted while waiting for lock on `{0}`")]
    LockInterrupted(String),

    #[error("tier `{tier}` is unavailable: {source}")]
    TierUnavailable {
        tier: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("optimistic version conflict writing `{0}`")]
    Conflict(String),

    #[error("stream bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("ttl of {requested_millis}ms exceeds the maximum of {max_millis}ms")]
    InvalidTtl {
        requested_millis: u64,
        max_millis: u64,
    },

    #[error("persistence for `{id}` was exhausted after {attempts} attempts")]
    PersistenceExhausted { id: String, attempts: u32 },

    #[error("a fabric named `{0}` already exists")]
    DuplicateName(String),

    #[error("fabric `{0}` has shut down and rejects new operations")]
    Shutdown(String),
}

pub type Result<T> = std::result::Result<T, Error>;
