mod error;
mod id;
mod time;
mod tracing_init;
mod ttl;

pub use error::{Error, Result};
pub use id::EntityId;
pub use time::now_millis;
pub use tracing_init::init_tracing;
pub use ttl::Ttl;
