mod merge;
mod record;

pub use record::{EntityRecord, PLAYER_TYPE};
