mod document;
pub mod fake;
mod shared;

#[cfg(feature = "live-backends")]
pub mod mongo;
#[cfg(feature = "live-backends")]
pub mod redis_store;

pub use document::{DocumentStore, IndexConfig, ENTITY_COLLECTION, PLAYER_COLLECTION};
pub use shared::{EntryId, LogEntry, SharedStore};
