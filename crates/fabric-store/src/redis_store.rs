//! [`SharedStore`] backed by Redis, gated behind the `live-backends` feature.
//!
//! Connection parameters arrive as an opaque string (§6.1's "connection
//! parameters come in as an opaque configuration struct") which we pass
//! straight through to `redis::Client::open`.

use crate::shared::{unavailable, EntryId, LogEntry, SharedStore};
use async_trait::async_trait;
use fabric_base::{Result, Ttl};
use redis::AsyncCommands;

/// Connection configuration for the Redis-backed shared store (§6.1).
#[derive(Clone, Debug, serde::Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    8
}

pub struct RedisSharedStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisSharedStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| unavailable("l2", e))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| unavailable("l2", e))?;
        Ok(Self { manager })
    }

    fn conn(&self) -> redis::aio::ConnectionManager {
        self.manager.clone()
    }
}

// Atomically releases a leased lock only if the stored token still matches.
const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

// Atomically increments a counter, arming a TTL only on first creation.
const INCR_WITH_TTL_SCRIPT: &str = r#"
local next = redis.call("INCR", KEYS[1])
if next == 1 and tonumber(ARGV[1]) then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return next
"#;

#[async_trait]
impl SharedStore for RedisSharedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.conn()
            .get(key)
            .await
            .map_err(|e| unavailable("l2", e))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Ttl>) -> Result<()> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, value, ttl.as_millis().max(1) / 1000 + 1)
                    .await
                    .map_err(|e| unavailable("l2", e))?;
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(|e| unavailable("l2", e))?;
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _: () = self.conn().del(key).await.map_err(|e| unavailable("l2", e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.conn()
            .exists(key)
            .await
            .map_err(|e| unavailable("l2", e))
    }

    async fn compute_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Ttl>,
    ) -> Result<Vec<u8>> {
        let mut conn = self.conn();
        let mut set_cmd = redis::cmd("SET");
        set_cmd.arg(key).arg(&value).arg("NX");
        if let Some(ttl) = ttl {
            set_cmd.arg("PX").arg(ttl.as_millis().max(1));
        }
        let set: Option<String> = set_cmd.query_async(&mut conn).await.map_err(|e| unavailable("l2", e))?;
        if set.is_some() {
            return Ok(value);
        }
        conn.get(key).await.map_err(|e| unavailable("l2", e))
    }

    async fn incr(&self, key: &str, ttl: Option<Ttl>) -> Result<i64> {
        let script = redis::Script::new(INCR_WITH_TTL_SCRIPT);
        let ttl_millis = ttl.map(|t| t.as_millis() as i64).unwrap_or(0);
        script
            .key(key)
            .arg(ttl_millis)
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| unavailable("l2", e))
    }

    async fn try_acquire_lease(&self, key: &str, token: &str, lease: Ttl) -> Result<bool> {
        let mut conn = self.conn();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("l2", e))?;
        Ok(set.is_some())
    }

    async fn release_lease(&self, key: &str, token: &str) -> Result<bool> {
        let script = redis::Script::new(RELEASE_LEASE_SCRIPT);
        let released: i64 = script
            .key(key)
            .arg(token)
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| unavailable("l2", e))?;
        Ok(released == 1)
    }

    async fn log_append(
        &self,
        stream: &str,
        action: &str,
        payload: &str,
        ttl: Ttl,
        published_millis: u64,
    ) -> Result<LogEntry> {
        let mut conn = self.conn();
        let id: String = conn
            .xadd(
                stream,
                "*",
                &[
                    ("action", action),
                    ("payload", payload),
                    ("published_millis", published_millis.to_string().as_str()),
                    ("ttl_millis", ttl.as_millis().to_string().as_str()),
                ],
            )
            .await
            .map_err(|e| unavailable("bus", e))?;

        Ok(LogEntry {
            entry_id: redis_stream_id_to_entry_id(&id),
            action: action.to_string(),
            payload: payload.to_string(),
            published_millis,
            ttl_millis: ttl.as_millis(),
        })
    }

    async fn log_read_from(
        &self,
        stream: &str,
        after: Option<EntryId>,
        limit: usize,
    ) -> Result<Vec<LogEntry>> {
        let mut conn = self.conn();
        let start = after
            .map(|id| format!("({}", entry_id_to_redis_stream_id(id)))
            .unwrap_or_else(|| "-".to_string());

        let reply: redis::streams::StreamRangeReply = conn
            .xrange_count(stream, start.as_str(), "+", limit)
            .await
            .map_err(|e| unavailable("bus", e))?;

        let mut entries = Vec::with_capacity(reply.ids.len());
        for id in reply.ids {
            let map = id.map;
            let action = field_as_string(&map, "action").unwrap_or_default();
            let payload = field_as_string(&map, "payload").unwrap_or_default();
            let published_millis = field_as_string(&map, "published_millis")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let ttl_millis = field_as_string(&map, "ttl_millis")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            entries.push(LogEntry {
                entry_id: redis_stream_id_to_entry_id(&id.id),
                action,
                payload,
                published_millis,
                ttl_millis,
            });
        }
        Ok(entries)
    }

    async fn log_trim(&self, stream: &str, entry_id: EntryId) -> Result<()> {
        let id = entry_id_to_redis_stream_id(entry_id);
        let _: i64 = self
            .conn()
            .xdel(stream, &[id])
            .await
            .map_err(|e| unavailable("bus", e))?;
        Ok(())
    }
}

fn field_as_string(map: &std::collections::HashMap<String, redis::Value>, field: &str) -> Option<String> {
    match map.get(field)? {
        redis::Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

// Redis stream IDs are `<millis>-<seq>`; we fold them into a single u64 so
// the rest of the fabric can treat entry ids as plain opaque, ordered
// integers. This assumes fewer than 2^20 entries share a millisecond,
// which Redis itself would also need to roll over to avoid.
fn redis_stream_id_to_entry_id(id: &str) -> EntryId {
    let (millis, seq) = id.split_once('-').unwrap_or((id, "0"));
    let millis: u64 = millis.parse().unwrap_or(0);
    let seq: u64 = seq.parse().unwrap_or(0);
    EntryId((millis << 20) | (seq & 0xF_FFFF))
}

fn entry_id_to_redis_stream_id(id: EntryId) -> String {
    let millis = id.0 >> 20;
    let seq = id.0 & 0xF_FFFF;
    format!("{millis}-{seq}")
}
