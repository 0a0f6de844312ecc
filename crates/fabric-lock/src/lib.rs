mod local;
mod manager;
mod shared;

pub use local::LocalLockBackend;
pub use manager::LockManager;
pub use shared::SharedLockBackend;
