//! The `executeUnderLock` façade (§4.1): picks between a local and a
//! shared backend without exposing either to callers.

use crate::local::LocalLockBackend;
use crate::shared::SharedLockBackend;
use fabric_base::Result;
use fabric_store::SharedStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

enum Backend {
    Local(LocalLockBackend),
    Shared(SharedLockBackend),
}

/// Key-scoped, reentrant, lease-bounded lock manager. Construct with
/// [`LockManager::local`] for a single-node deployment or
/// [`LockManager::shared`] to coordinate across the fleet.
pub struct LockManager {
    backend: Backend,
}

impl LockManager {
    pub fn local() -> Self {
        Self {
            backend: Backend::Local(LocalLockBackend::new()),
        }
    }

    pub fn shared(store: Arc<dyn SharedStore>) -> Self {
        Self {
            backend: Backend::Shared(SharedLockBackend::new(store)),
        }
    }

    /// Runs `body` while holding the lock on `key`. Waits up to `wait` to
    /// acquire it, then bounds execution of `body` by `lease`: if `body`
    /// overruns the lease the lock is released and `Error::LockTimeout` is
    /// returned, regardless of how `body` would otherwise have completed.
    pub async fn run_under_lock<F, Fut, T>(&self, key: &str, wait: Duration, lease: Duration, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match &self.backend {
            Backend::Local(backend) => backend.run_under_lock(key, wait, lease, body).await,
            Backend::Shared(backend) => backend.run_under_lock(key, wait, lease, body).await,
        }
    }

    /// As [`Self::run_under_lock`], but a cancelled `cancel` during the
    /// acquisition wait reports `Error::LockInterrupted` instead of waiting
    /// out `wait` to report `Error::LockTimeout`.
    pub async fn run_under_lock_cancellable<F, Fut, T>(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
        cancel: &CancellationToken,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match &self.backend {
            Backend::Local(backend) => backend.run_under_lock_cancellable(key, wait, lease, cancel, body).await,
            Backend::Shared(backend) => backend.run_under_lock_cancellable(key, wait, lease, cancel, body).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_base::Error;
    use fabric_store::fake::FakeSharedStore;

    #[tokio::test]
    async fn local_manager_runs_body_and_returns_its_result() {
        let manager = LockManager::local();
        let result = manager
            .run_under_lock("k", Duration::from_secs(1), Duration::from_secs(1), || async { 7 })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn shared_manager_wait_zero_on_held_key_times_out() {
        let manager = Arc::new(LockManager::shared(Arc::new(FakeSharedStore::new())));
        let entered = Arc::new(tokio::sync::Notify::new());

        let holder = {
            let manager = manager.clone();
            let entered = entered.clone();
            tokio::spawn(async move {
                manager
                    .run_under_lock("k", Duration::from_secs(1), Duration::from_secs(5), || async move {
                        entered.notify_one();
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    })
                    .await
            })
        };

        entered.notified().await;
        let result = manager
            .run_under_lock("k", Duration::ZERO, Duration::from_secs(1), || async { () })
            .await;
        assert!(matches!(result, Err(Error::LockTimeout(_))));
        holder.await.unwrap().unwrap();
    }
}
