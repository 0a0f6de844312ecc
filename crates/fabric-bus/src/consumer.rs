//! The per-fabric stream bus: publish, and a consumer loop that dispatches
//! entries to registered accepters (§4.6).

use crate::accepter::Accepter;
use dashmap::DashMap;
use fabric_base::{now_millis, Error, Result, Ttl};
use fabric_store::{EntryId, LogEntry, SharedStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn stream_name(fabric: &str) -> String {
    format!("fabric:{fabric}:bus")
}

fn as_bus_error(fabric: &str, e: Error) -> Error {
    match e {
        Error::TierUnavailable { tier: "bus", source } => Error::BusUnavailable(format!("{fabric}: {source}")),
        other => other,
    }
}

/// Owns the bus for a single fabric: publishing, accepter registration, and
/// the consumer loop that reads and dispatches new entries.
pub struct StreamBus {
    fabric: String,
    store: Arc<dyn SharedStore>,
    accepters: DashMap<String, Vec<Arc<dyn Accepter>>>,
    processed: DashMap<(String, EntryId), ()>,
    cursor: Mutex<Option<EntryId>>,
    entries_read: AtomicU64,
}

impl StreamBus {
    pub fn new(fabric: impl Into<String>, store: Arc<dyn SharedStore>) -> Self {
        Self {
            fabric: fabric.into(),
            store,
            accepters: DashMap::new(),
            processed: DashMap::new(),
            cursor: Mutex::new(None),
            entries_read: AtomicU64::new(0),
        }
    }

    pub fn register_accepter(&self, action: impl Into<String>, accepter: Arc<dyn Accepter>) {
        self.accepters.entry(action.into()).or_default().push(accepter);
    }

    /// Total entries this node's consumer has read from the bus, regardless
    /// of how many accepters they dispatched to.
    pub fn entries_read(&self) -> u64 {
        self.entries_read.load(Ordering::Relaxed)
    }

    pub async fn publish(&self, action: &str, payload: &str, ttl: Ttl) -> Result<LogEntry> {
        self.store
            .log_append(&stream_name(&self.fabric), action, payload, ttl, now_millis())
            .await
            .map_err(|e| as_bus_error(&self.fabric, e))
    }

    /// Reads and dispatches whatever is new since the last call, once.
    /// Exposed directly so callers (and tests) can drive delivery without
    /// the background loop's polling cadence.
    ///
    /// The cursor only advances across a contiguous run of fully-processed
    /// entries starting at `after`: the first entry this poll leaves with
    /// an accepter still unsatisfied becomes the new low-water mark, and
    /// the cursor stops short of it (and everything after it) even though
    /// later entries in the same batch are still dispatched. `log_read_from`
    /// reads strictly after the cursor, so a stalled entry is read and
    /// retried on every subsequent poll until it is fully processed; the
    /// per-(accepter, entry) `processed` set keeps that retry from
    /// re-invoking accepters that already succeeded on it.
    pub async fn poll_once(&self) -> Result<usize> {
        let after = *self.cursor.lock().expect("cursor lock poisoned");
        let entries = self
            .store
            .log_read_from(&stream_name(&self.fabric), after, 256)
            .await
            .map_err(|e| as_bus_error(&self.fabric, e))?;

        let count = entries.len();
        let mut low_water_mark = after;
        let mut stalled = false;
        for entry in entries {
            let all_processed = self.dispatch(&entry).await;
            if all_processed && !stalled {
                low_water_mark = Some(entry.entry_id);
            } else {
                stalled = true;
            }
            self.entries_read.fetch_add(1, Ordering::Relaxed);
        }
        *self.cursor.lock().expect("cursor lock poisoned") = low_water_mark;
        Ok(count)
    }

    /// Dispatches `entry` to every accepter registered for its action and
    /// returns whether all of them are now marked processed.
    async fn dispatch(&self, entry: &LogEntry) -> bool {
        let Some(accepters) = self.accepters.get(&entry.action).map(|a| a.value().clone()) else {
            self.maybe_trim(entry, true).await;
            return true;
        };

        let mut all_processed = true;
        for accepter in accepters {
            let key = (accepter.id().to_string(), entry.entry_id);
            if self.processed.contains_key(&key) {
                continue;
            }
            match accepter.accept(entry).await {
                Ok(()) => {
                    self.processed.insert(key, ());
                }
                Err(error) => {
                    all_processed = false;
                    tracing::warn!(
                        fabric = %self.fabric,
                        action = %entry.action,
                        entry_id = %entry.entry_id,
                        accepter = accepter.id(),
                        %error,
                        "accepter failed; entry remains for a future poll"
                    );
                }
            }
        }

        self.maybe_trim(entry, all_processed).await;
        all_processed
    }

    async fn maybe_trim(&self, entry: &LogEntry, all_processed: bool) {
        let expired = entry.is_expired(now_millis());
        if !all_processed && !expired {
            return;
        }
        if let Err(error) = self.store.log_trim(&stream_name(&self.fabric), entry.entry_id).await {
            tracing::debug!(fabric = %self.fabric, entry_id = %entry.entry_id, %error, "trim failed, another consumer may retry it");
        }
    }

    /// Runs [`Self::poll_once`] on `interval` until `shutdown` is cancelled.
    /// Per §4.6, a cancelled consumer finishes its current entry before
    /// stopping rather than abandoning it mid-dispatch.
    pub async fn run_consumer_loop(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {
                    if let Err(error) = self.poll_once().await {
                        tracing::warn!(fabric = %self.fabric, %error, "stream bus poll failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accepter::ClosureAccepter;
    use fabric_store::fake::FakeSharedStore;
    use std::sync::atomic::AtomicUsize;

    fn bus() -> StreamBus {
        StreamBus::new("test-fabric", Arc::new(FakeSharedStore::new()))
    }

    #[tokio::test]
    async fn unregistered_action_is_skipped_and_trimmed() {
        let bus = bus();
        bus.publish("no-one-listens", "payload", Ttl::from_millis(60_000).unwrap()).await.unwrap();
        assert_eq!(bus.poll_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn each_accepter_processes_an_entry_at_most_once() {
        let bus = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let accepter = Arc::new(ClosureAccepter::new("sync-by-id", move |_entry| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        bus.register_accepter(crate::accepter::PLAYER_DATA_SYNC_BY_ID, accepter);

        bus.publish(crate::accepter::PLAYER_DATA_SYNC_BY_ID, "player-1", Ttl::from_millis(60_000).unwrap())
            .await
            .unwrap();
        bus.poll_once().await.unwrap();
        // A second poll with nothing new dispatches nothing further.
        bus.poll_once().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_accept_is_not_marked_processed() {
        let bus = bus();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let accepter = Arc::new(ClosureAccepter::new("flaky", move |_entry| {
            let attempts = attempts_clone.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(Error::BusUnavailable("simulated".to_string()))
                } else {
                    Ok(())
                }
            }
        }));
        bus.register_accepter("custom-action", accepter);

        bus.publish("custom-action", "payload", Ttl::from_millis(60_000).unwrap()).await.unwrap();
        bus.poll_once().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // The entry failed, so the cursor did not advance past it; a plain
        // subsequent poll re-reads and retries it without any manual reset.
        bus.poll_once().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cursor_stalls_at_first_unprocessed_entry_but_later_entries_still_dispatch() {
        let bus = bus();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let flaky = Arc::new(ClosureAccepter::new("flaky", move |_entry| {
            let attempts = attempts_clone.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(Error::BusUnavailable("simulated".to_string()))
                } else {
                    Ok(())
                }
            }
        }));
        bus.register_accepter("flaky-action", flaky);

        let later_calls = Arc::new(AtomicUsize::new(0));
        let later_calls_clone = later_calls.clone();
        let reliable = Arc::new(ClosureAccepter::new("reliable", move |_entry| {
            let later_calls = later_calls_clone.clone();
            async move {
                later_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        bus.register_accepter("reliable-action", reliable);

        bus.publish("flaky-action", "payload-1", Ttl::from_millis(60_000).unwrap()).await.unwrap();
        bus.publish("reliable-action", "payload-2", Ttl::from_millis(60_000).unwrap()).await.unwrap();

        // Both entries are read and dispatched in this poll: the first
        // fails, but the second — published after it — still runs.
        bus.poll_once().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(later_calls.load(Ordering::SeqCst), 1);

        // The cursor stalled at the flaky entry, so both it and the
        // already-succeeded reliable entry are read again; the reliable
        // accepter is skipped via the processed set and not invoked twice.
        bus.poll_once().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(later_calls.load(Ordering::SeqCst), 1);
    }
}
