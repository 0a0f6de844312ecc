//! In-memory fakes for [`crate::SharedStore`] and [`crate::DocumentStore`].
//!
//! These are what the fabric's own test suite runs against so that unit
//! tests never need a live Redis or MongoDB — the same pattern the teacher
//! uses for Postgres-backed components under `sqlx::test`, substituted here
//! with a hand-rolled in-memory double since the fabric's backends are
//! swappable trait objects rather than a fixed SQL schema.

use crate::document::{DocumentStore, IndexConfig};
use crate::shared::{EntryId, LogEntry, SharedStore};
use async_trait::async_trait;
use dashmap::DashMap;
use fabric_base::{now_millis, EntityId, Error, Result, Ttl};
use fabric_model::EntityRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

struct StoredValue {
    bytes: Vec<u8>,
    expires_at_millis: Option<u64>,
}

impl StoredValue {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at_millis.map(|at| now >= at).unwrap_or(false)
    }
}

struct Lease {
    token: String,
    expires_at_millis: u64,
}

/// An in-process stand-in for the shared store of §6.1/§6.2.
#[derive(Default)]
pub struct FakeSharedStore {
    kv: DashMap<String, StoredValue>,
    leases: DashMap<String, Lease>,
    streams: DashMap<String, Mutex<Vec<LogEntry>>>,
    next_entry_id: AtomicU64,
}

impl FakeSharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn expires_at(ttl: Option<Ttl>) -> Option<u64> {
        ttl.map(|t| now_millis() + t.as_millis())
    }
}

#[async_trait]
impl SharedStore for FakeSharedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = now_millis();
        match self.kv.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.bytes.clone())),
            Some(_) => {
                self.kv.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Ttl>) -> Result<()> {
        self.kv.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at_millis: Self::expires_at(ttl),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.kv.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn compute_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Ttl>,
    ) -> Result<Vec<u8>> {
        let now = now_millis();
        if let Some(existing) = self.kv.get(key) {
            if !existing.is_expired(now) {
                return Ok(existing.bytes.clone());
            }
        }
        self.kv.insert(
            key.to_string(),
            StoredValue {
                bytes: value.clone(),
                expires_at_millis: Self::expires_at(ttl),
            },
        );
        Ok(value)
    }

    async fn incr(&self, key: &str, ttl: Option<Ttl>) -> Result<i64> {
        // Stored as the ASCII decimal string `redis::AsyncCommands::incr`
        // would leave behind, so `get`/`RetryCounter::get` decode identically
        // whichever `SharedStore` backs them.
        let now = now_millis();
        let mut fresh = false;
        let mut entry = self.kv.entry(key.to_string()).or_insert_with(|| {
            fresh = true;
            StoredValue {
                bytes: b"0".to_vec(),
                expires_at_millis: None,
            }
        });

        if entry.is_expired(now) {
            entry.bytes = b"0".to_vec();
            entry.expires_at_millis = None;
            fresh = true;
        }

        let current: i64 = std::str::from_utf8(&entry.bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        entry.bytes = next.to_string().into_bytes();

        if fresh {
            entry.expires_at_millis = Self::expires_at(ttl);
        }

        Ok(next)
    }

    async fn try_acquire_lease(&self, key: &str, token: &str, lease: Ttl) -> Result<bool> {
        let now = now_millis();
        let mut acquired = false;
        self.leases
            .entry(key.to_string())
            .and_modify(|existing| {
                if now >= existing.expires_at_millis {
                    *existing = Lease {
                        token: token.to_string(),
                        expires_at_millis: now + lease.as_millis(),
                    };
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                Lease {
                    token: token.to_string(),
                    expires_at_millis: now + lease.as_millis(),
                }
            });
        Ok(acquired)
    }

    async fn release_lease(&self, key: &str, token: &str) -> Result<bool> {
        let Some(entry) = self.leases.get(key) else {
            return Ok(false);
        };
        if entry.token != token {
            return Ok(false);
        }
        drop(entry);
        self.leases.remove(key);
        Ok(true)
    }

    async fn log_append(
        &self,
        stream: &str,
        action: &str,
        payload: &str,
        ttl: Ttl,
        published_millis: u64,
    ) -> Result<LogEntry> {
        let entry_id = EntryId(self.next_entry_id.fetch_add(1, Ordering::SeqCst));
        let entry = LogEntry {
            entry_id,
            action: action.to_string(),
            payload: payload.to_string(),
            published_millis,
            ttl_millis: ttl.as_millis(),
        };
        self.streams
            .entry(stream.to_string())
            .or_default()
            .lock()
            .expect("stream lock poisoned")
            .push(entry.clone());
        Ok(entry)
    }

    async fn log_read_from(
        &self,
        stream: &str,
        after: Option<EntryId>,
        limit: usize,
    ) -> Result<Vec<LogEntry>> {
        let Some(entries) = self.streams.get(stream) else {
            return Ok(Vec::new());
        };
        let entries = entries.lock().expect("stream lock poisoned");
        Ok(entries
            .iter()
            .filter(|e| after.map(|a| e.entry_id > a).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn log_trim(&self, stream: &str, entry_id: EntryId) -> Result<()> {
        if let Some(entries) = self.streams.get(stream) {
            entries
                .lock()
                .expect("stream lock poisoned")
                .retain(|e| e.entry_id != entry_id);
        }
        Ok(())
    }
}

/// An in-process stand-in for the document store of §6.3.
#[derive(Default)]
pub struct FakeDocumentStore {
    entities: DashMap<EntityId, EntityRecord>,
}

impl FakeDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn get_entity(&self, id: EntityId) -> Result<Option<EntityRecord>> {
        Ok(self.entities.get(&id).map(|r| r.value().without_cache()))
    }

    async fn put_entity(&self, record: &EntityRecord, expected_version: Option<u64>) -> Result<()> {
        match (self.entities.get(&record.id()), expected_version) {
            (None, None) => {}
            (Some(existing), Some(expected)) if existing.version() == expected => {}
            (Some(_), None) => {
                return Err(Error::Conflict(record.id().to_string()));
            }
            (None, Some(_)) => {
                return Err(Error::Conflict(record.id().to_string()));
            }
            (Some(existing), Some(_)) => {
                return Err(Error::Conflict(format!(
                    "{} (stored version {})",
                    record.id(),
                    existing.version()
                )));
            }
        }
        self.entities
            .insert(record.id(), record.without_cache());
        Ok(())
    }

    async fn remove_entity(&self, id: EntityId) -> Result<()> {
        self.entities.remove(&id);
        Ok(())
    }

    async fn ensure_indexes(&self, _config: &IndexConfig) -> Result<()> {
        // The fake store has no secondary indexes to create; equality scans
        // are done in-line by whatever reads `entities`. Real `mongodb`
        // backend creates the indexes of §6.3.
        Ok(())
    }
}
