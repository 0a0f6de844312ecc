//! [`DocumentStore`] backed by MongoDB, gated behind the `live-backends`
//! feature. Implements the collection schema and indexes of §6.3.

use crate::document::{DocumentStore, IndexConfig, ENTITY_COLLECTION, PLAYER_COLLECTION};
use crate::shared::unavailable;
use async_trait::async_trait;
use fabric_base::{EntityId, Error, Result};
use fabric_model::EntityRecord;
use mongodb::bson::{doc, Document};
use mongodb::options::{IndexOptions, UpdateOptions};
use mongodb::{Client, Database, IndexModel};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, serde::Deserialize)]
pub struct MongoConfig {
    pub url: String,
    pub database: String,
}

pub struct MongoDocumentStore {
    db: Database,
}

impl MongoDocumentStore {
    pub async fn connect(config: &MongoConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.url)
            .await
            .map_err(|e| unavailable("l3", e))?;
        Ok(Self {
            db: client.database(&config.database),
        })
    }

    fn entities(&self) -> mongodb::Collection<Document> {
        self.db.collection(ENTITY_COLLECTION)
    }

    fn player_data(&self) -> mongodb::Collection<Document> {
        self.db.collection(PLAYER_COLLECTION)
    }
}

fn record_to_entity_document(record: &EntityRecord) -> Document {
    let attributes: Document = record
        .attributes()
        .iter()
        .map(|(k, v)| (k.clone(), mongodb::bson::Bson::String(v.clone())))
        .collect();
    let relationships: Document = record
        .relationships()
        .iter()
        .map(|(k, targets)| {
            let ids: Vec<mongodb::bson::Bson> = targets
                .iter()
                .map(|id| mongodb::bson::Bson::String(id.to_string()))
                .collect();
            (k.clone(), mongodb::bson::Bson::Array(ids))
        })
        .collect();

    doc! {
        "id": record.id().to_string(),
        "entityType": record.entity_type(),
        "attributes": attributes,
        "relationships": relationships,
        "version": record.version() as i64,
        "lastModifiedMillis": record.last_modified_millis() as i64,
    }
}

fn document_to_record(document: Document) -> Option<EntityRecord> {
    let id: EntityId = document.get_str("id").ok()?.parse().ok()?;
    let entity_type = document.get_str("entityType").ok()?.to_string();
    let version = document.get_i64("version").ok()? as u64;
    let last_modified_millis = document.get_i64("lastModifiedMillis").ok()? as u64;

    let mut record = EntityRecord::new(id, entity_type);
    // `new` seeds version at 0 with the current wall-clock time; overwrite
    // both with the persisted values via the bulk-bump helper below.
    if let Ok(attrs) = document.get_document("attributes") {
        let entries: BTreeMap<String, String> = attrs
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();
        record.add_attributes(entries);
    }
    if let Ok(rels) = document.get_document("relationships") {
        for (key, value) in rels.iter() {
            if let Some(array) = value.as_array() {
                let targets: BTreeSet<EntityId> = array
                    .iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| s.parse().ok())
                    .collect();
                for target in targets {
                    record.add_relationship(key.clone(), target);
                }
            }
        }
    }
    record.force_version_and_timestamp(version, last_modified_millis);
    Some(record)
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn get_entity(&self, id: EntityId) -> Result<Option<EntityRecord>> {
        let found = self
            .entities()
            .find_one(doc! { "id": id.to_string() }, None)
            .await
            .map_err(|e| unavailable("l3", e))?;
        Ok(found.and_then(document_to_record))
    }

    async fn put_entity(&self, record: &EntityRecord, expected_version: Option<u64>) -> Result<()> {
        // `expected_version: None` upserts unconditionally on `id`; a racing
        // first-write from another node is resolved the same way any other
        // conflict is, by the caller re-reading and merging (§4.4), not by
        // this call itself rejecting a concurrent create.
        let filter = match expected_version {
            Some(expected) => doc! {
                "id": record.id().to_string(),
                "version": expected as i64,
            },
            None => doc! {
                "id": record.id().to_string(),
            },
        };

        let update = doc! { "$set": record_to_entity_document(record) };
        let options = UpdateOptions::builder().upsert(expected_version.is_none()).build();

        let result = self
            .entities()
            .update_one(filter, update, options)
            .await
            .map_err(|e| unavailable("l3", e))?;

        if expected_version.is_some() && result.matched_count == 0 {
            return Err(Error::Conflict(record.id().to_string()));
        }

        if record.is_player() {
            let player_doc = doc! {
                "id": record.id().to_string(),
                "data": record
                    .attributes()
                    .iter()
                    .map(|(k, v)| (k.clone(), mongodb::bson::Bson::String(v.clone())))
                    .collect::<Document>(),
            };
            self.player_data()
                .update_one(
                    doc! { "id": record.id().to_string() },
                    doc! { "$set": player_doc },
                    UpdateOptions::builder().upsert(true).build(),
                )
                .await
                .map_err(|e| unavailable("l3", e))?;
        }

        Ok(())
    }

    async fn remove_entity(&self, id: EntityId) -> Result<()> {
        self.entities()
            .delete_one(doc! { "id": id.to_string() }, None)
            .await
            .map_err(|e| unavailable("l3", e))?;
        self.player_data()
            .delete_one(doc! { "id": id.to_string() }, None)
            .await
            .map_err(|e| unavailable("l3", e))?;
        Ok(())
    }

    async fn ensure_indexes(&self, config: &IndexConfig) -> Result<()> {
        let entity_type_index = IndexModel::builder()
            .keys(doc! { "entityType": 1 })
            .build();
        self.entities()
            .create_index(entity_type_index, None)
            .await
            .map_err(|e| unavailable("l3", e))?;

        for key in &config.indexed_attribute_keys {
            let index = IndexModel::builder()
                .keys(doc! { format!("attributes.{key}"): 1 })
                .options(IndexOptions::builder().sparse(true).build())
                .build();
            self.entities()
                .create_index(index, None)
                .await
                .map_err(|e| unavailable("l3", e))?;
        }

        for key in &config.indexed_relationship_keys {
            let index = IndexModel::builder()
                .keys(doc! { format!("relationships.{key}"): 1 })
                .build();
            self.entities()
                .create_index(index, None)
                .await
                .map_err(|e| unavailable("l3", e))?;
        }

        for key in &config.indexed_player_data_keys {
            let index = IndexModel::builder()
                .keys(doc! { format!("data.{key}"): 1 })
                .options(IndexOptions::builder().sparse(true).build())
                .build();
            self.player_data()
                .create_index(index, None)
                .await
                .map_err(|e| unavailable("l3", e))?;
        }

        Ok(())
    }
}
