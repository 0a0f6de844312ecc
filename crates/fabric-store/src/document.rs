use async_trait::async_trait;
use fabric_base::{EntityId, Result};
use fabric_model::EntityRecord;

/// The document-store collections and index shape of §6.3.
pub const ENTITY_COLLECTION: &str = "legacy-entity-data";
pub const PLAYER_COLLECTION: &str = "legacy-player-data";

/// Attribute and relationship keys the fabric should keep indexed, supplied
/// by the caller at fabric creation (§6.3's "per configured attribute key").
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct IndexConfig {
    pub indexed_attribute_keys: Vec<String>,
    pub indexed_relationship_keys: Vec<String>,
    pub indexed_player_data_keys: Vec<String>,
}

/// The L3 document store abstraction (§4.3, §6.3): durable, cluster-wide,
/// never TTL-evicted, with optimistic-locking writes keyed on `version`.
///
/// One implementation (backed by `mongodb`) is provided behind the
/// `live-backends` feature; [`crate::fake::FakeDocumentStore`] is always
/// available and is what the fabric's own test suite runs against.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_entity(&self, id: EntityId) -> Result<Option<EntityRecord>>;

    /// Writes `record`, enforcing optimistic concurrency: succeeds only if
    /// the stored document's current version equals `expected_version`
    /// (`None` meaning "no document exists yet"). Returns `Err(Conflict)`
    /// on mismatch so the caller can re-read, merge (§4.4), and retry.
    async fn put_entity(&self, record: &EntityRecord, expected_version: Option<u64>) -> Result<()>;

    async fn remove_entity(&self, id: EntityId) -> Result<()>;

    /// Idempotently ensures the indexes of §6.3 exist; safe to call on
    /// every fabric startup.
    async fn ensure_indexes(&self, config: &IndexConfig) -> Result<()>;
}
