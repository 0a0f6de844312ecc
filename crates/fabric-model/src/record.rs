use fabric_base::{now_millis, EntityId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Per-record memoization. Never persisted, never replicated, and never
/// shared between independent clones of a record — each clone starts with
/// an empty cache of its own.
#[derive(Default)]
struct RawCache(Mutex<std::collections::HashMap<String, String>>);

impl RawCache {
    fn get(&self, key: &str) -> Option<String> {
        self.0.lock().expect("raw cache lock poisoned").get(key).cloned()
    }

    fn put(&self, key: String, value: String) {
        self.0.lock().expect("raw cache lock poisoned").insert(key, value);
    }

    fn clear(&self) {
        self.0.lock().expect("raw cache lock poisoned").clear();
    }
}

impl std::fmt::Debug for RawCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawCache(..)")
    }
}

/// The canonical "player" record type name (§3).
pub const PLAYER_TYPE: &str = "player";

/// An entity or player record: attributes, typed relationships, and the
/// version/timestamp pair used for optimistic concurrency and merge.
///
/// A player record is simply an `EntityRecord` whose `entity_type` is
/// [`PLAYER_TYPE`] — see [`EntityRecord::new_player`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct EntityRecord {
    pub(crate) id: EntityId,
    entity_type: String,
    pub(crate) attributes: BTreeMap<String, String>,
    pub(crate) relationships: BTreeMap<String, BTreeSet<EntityId>>,
    pub(crate) version: u64,
    pub(crate) last_modified_millis: u64,
    #[serde(skip)]
    raw_cache: Arc<RawCache>,
}

impl EntityRecord {
    /// Creates a brand-new record at version 0. The first mutation bumps it
    /// to version 1, matching the "version is non-decreasing" invariant
    /// without implying a prior mutation ever happened.
    pub fn new(id: EntityId, entity_type: impl Into<String>) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
            version: 0,
            last_modified_millis: now_millis(),
            raw_cache: Arc::new(RawCache::default()),
        }
    }

    pub fn new_player(id: EntityId) -> Self {
        Self::new(id, PLAYER_TYPE)
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn is_player(&self) -> bool {
        self.entity_type == PLAYER_TYPE
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_modified_millis(&self) -> u64 {
        self.last_modified_millis
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn relationships(&self) -> &BTreeMap<String, BTreeSet<EntityId>> {
        &self.relationships
    }

    /// Strips the transient memoization cache. Every tier adapter must call
    /// this (or construct records through deserialization, which never
    /// populates the cache) before a record crosses a tier or node boundary.
    pub fn without_cache(&self) -> Self {
        let mut clone = self.clone();
        clone.raw_cache = Arc::new(RawCache::default());
        clone
    }

    /// Memoizes a derived, transient string under `key`. Does not bump
    /// version/timestamp — this is explicitly non-mutating per §3.
    pub fn cache_put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.raw_cache.put(key.into(), value.into());
    }

    pub fn cache_get(&self, key: &str) -> Option<String> {
        self.raw_cache.get(key)
    }

    pub fn cache_clear(&self) {
        self.raw_cache.clear();
    }

    fn bump(&mut self) {
        self.last_modified_millis = self.last_modified_millis.max(now_millis());
        self.version += 1;
    }

    /// §4.4 `addAttribute`.
    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
        self.bump();
    }

    /// §4.4 `addAttributes` (bulk). Bumps `(version, lastModifiedMillis)`
    /// exactly once for the whole batch, per spec's "per call" wording.
    pub fn add_attributes<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut changed = false;
        for (k, v) in entries {
            self.attributes.insert(k.into(), v.into());
            changed = true;
        }
        if changed {
            self.bump();
        }
    }

    /// §4.4 `getAttribute`. Non-mutating.
    pub fn get_attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// §4.4 `removeAttribute`. Bumps only if the key was present.
    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        let removed = self.attributes.remove(key);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// §4.4 `addRelationship`.
    pub fn add_relationship(&mut self, key: impl Into<String>, target: EntityId) {
        let inserted = self.relationships.entry(key.into()).or_default().insert(target);
        if inserted {
            self.bump();
        }
    }

    /// §4.4 `removeRelationship`. Bumps only if the target was present;
    /// drops the key entirely once its target set becomes empty.
    pub fn remove_relationship(&mut self, key: &str, target: EntityId) -> bool {
        let Some(targets) = self.relationships.get_mut(key) else {
            return false;
        };
        let removed = targets.remove(&target);
        if targets.is_empty() {
            self.relationships.remove(key);
        }
        if removed {
            self.bump();
        }
        removed
    }

    /// §4.4 `hasRelationship`. Non-mutating.
    pub fn has_relationship(&self, key: &str, target: EntityId) -> bool {
        self.relationships
            .get(key)
            .map(|targets| targets.contains(&target))
            .unwrap_or(false)
    }

    /// §4.4 `getRelatedEntities`. Non-mutating.
    pub fn get_related_entities(&self, key: &str) -> BTreeSet<EntityId> {
        self.relationships.get(key).cloned().unwrap_or_default()
    }

    /// §4.4 `countRelationships`. Non-mutating.
    pub fn count_relationships(&self, key: &str) -> usize {
        self.relationships.get(key).map(BTreeSet::len).unwrap_or(0)
    }

    /// §4.4 `clearRelationships`. Bumps only if the key was present.
    pub fn clear_relationships(&mut self, key: &str) -> bool {
        let removed = self.relationships.remove(key).is_some();
        if removed {
            self.bump();
        }
        removed
    }

    /// Marks the record as bumped without changing any field, for callers
    /// (e.g. `fabric-cache::put`) that must guarantee a version bump
    /// happened even when the caller supplied an already-mutated record.
    pub fn touch(&mut self) {
        self.bump();
    }

    /// Overwrites `version`/`last_modified_millis` directly, bypassing the
    /// usual bump. Only for tier adapters reconstructing a record from a
    /// persisted document, where the stored values are authoritative and
    /// must not be treated as a fresh mutation.
    pub fn force_version_and_timestamp(&mut self, version: u64, last_modified_millis: u64) {
        self.version = version;
        self.last_modified_millis = last_modified_millis;
    }
}
