mod accepter;
mod consumer;

pub use accepter::{Accepter, ClosureAccepter, PLAYER_DATA_SYNC_BY_ID, PLAYER_DATA_SYNC_BY_NAME};
pub use consumer::StreamBus;
