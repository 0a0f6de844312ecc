//! Accepter registration (§4.6). The two built-in actions are not special
//! cases of the dispatch machinery — they're just the conventional action
//! names a caller registers a [`ClosureAccepter`] under.

use async_trait::async_trait;
use fabric_base::Result;
use fabric_store::LogEntry;
use std::future::Future;
use std::sync::Arc;

pub const PLAYER_DATA_SYNC_BY_ID: &str = "player-data-sync-id";
pub const PLAYER_DATA_SYNC_BY_NAME: &str = "player-data-sync-name";

/// Something that reacts to entries published for a given action.
///
/// `id` must be stable and unique among accepters sharing an action: it is
/// the other half of the `(accepterId, entryId)` idempotency key (§4.6).
#[async_trait]
pub trait Accepter: Send + Sync {
    fn id(&self) -> &str;

    async fn accept(&self, entry: &LogEntry) -> Result<()>;
}

/// An [`Accepter`] built from a plain closure, for registering custom
/// actions (and the built-in player-sync ones) without a dedicated type.
pub struct ClosureAccepter<F> {
    id: Arc<str>,
    handler: F,
}

impl<F, Fut> ClosureAccepter<F>
where
    F: Fn(LogEntry) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    pub fn new(id: impl Into<Arc<str>>, handler: F) -> Self {
        Self { id: id.into(), handler }
    }
}

#[async_trait]
impl<F, Fut> Accepter for ClosureAccepter<F>
where
    F: Fn(LogEntry) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn accept(&self, entry: &LogEntry) -> Result<()> {
        (self.handler)(entry.clone()).await
    }
}
