//! Cross-node lock backend built on [`fabric_store::SharedStore`]'s
//! compare-and-set lease primitive (§4.1, §6.1).

use fabric_base::{Error, Result, Ttl};
use fabric_store::SharedStore;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

tokio::task_local! {
    static HELD: RefCell<HashMap<String, (String, u32)>>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

struct DepthGuard(String);

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let _ = HELD.try_with(|m| {
            if let Some((_, depth)) = m.borrow_mut().get_mut(&self.0) {
                *depth -= 1;
            }
        });
    }
}

/// Distributed lock manager backend, leasing keys in the fabric's shared
/// store instead of an in-process mutex (§9: "two interchangeable
/// implementations").
pub struct SharedLockBackend {
    store: Arc<dyn SharedStore>,
}

impl SharedLockBackend {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub async fn run_under_lock<F, Fut, T>(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.run_under_lock_cancellable(key, wait, lease, &CancellationToken::new(), body).await
    }

    /// As [`Self::run_under_lock`], but `cancel` is raced against the
    /// acquisition wait: if it fires before the lease is acquired, the
    /// waiter gives up with `Error::LockInterrupted` instead of waiting out
    /// `wait` to report `Error::LockTimeout`.
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
        if HELD.try_with(|_| ()).is_ok() {
            self.run_scoped(key, wait, lease, cancel, body).await
        } else {
            HELD.scope(RefCell::new(HashMap::new()), self.run_scoped(key, wait, lease, cancel, body))
                .await
        }
    }

    async fn run_scoped<F, Fut, T>(
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
        let held_token = HELD.with(|m| {
            let mut m = m.borrow_mut();
            m.get_mut(key).map(|(token, depth)| {
                *depth += 1;
                token.clone()
            })
        });

        if held_token.is_some() {
            let _guard = DepthGuard(key.to_string());
            return tokio::time::timeout(lease, body())
                .await
                .map_err(|_| Error::LockTimeout(key.to_string()));
        }

        let token = Uuid::new_v4().to_string();
        // Lock leases are not subject to the §4.2 retry/cache TTL ceiling;
        // clamp defensively rather than reject, since a caller-supplied
        // lease longer than that ceiling is still a meaningful request.
        let lease_ttl = Ttl::from_duration(lease).unwrap_or_else(|_| Ttl::from_millis(7 * 24 * 60 * 60 * 1000).expect("7 days is within its own ceiling"));

        let acquired = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(lock.key = key, "shared lock acquisition wait was cancelled");
                return Err(Error::LockInterrupted(key.to_string()));
            }
            result = tokio::time::timeout(wait, self.poll_acquire(key, &token, lease_ttl)) => {
                result.map_err(|_| {
                    tracing::debug!(lock.key = key, wait_millis = wait.as_millis() as u64, "shared lock acquisition timed out");
                    Error::LockTimeout(key.to_string())
                })??
            }
        };

        if !acquired {
            return Err(Error::LockTimeout(key.to_string()));
        }

        HELD.with(|m| {
            m.borrow_mut().insert(key.to_string(), (token.clone(), 1));
        });

        let result = tokio::time::timeout(lease, body()).await;

        HELD.with(|m| {
            m.borrow_mut().remove(key);
        });
        let _ = self.store.release_lease(key, &token).await;

        result.map_err(|_| Error::LockTimeout(key.to_string()))
    }

    async fn poll_acquire(&self, key: &str, token: &str, lease: Ttl) -> Result<bool> {
        loop {
            if self.store.try_acquire_lease(key, token, lease).await? {
                return Ok(true);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_store::fake::FakeSharedStore;

    fn store() -> Arc<dyn SharedStore> {
        Arc::new(FakeSharedStore::new())
    }

    #[tokio::test]
    async fn second_caller_waits_then_times_out_when_wait_is_zero() {
        let backend = Arc::new(SharedLockBackend::new(store()));
        let entered = Arc::new(tokio::sync::Notify::new());

        let holder = {
            let backend = backend.clone();
            let entered = entered.clone();
            tokio::spawn(async move {
                backend
                    .run_under_lock("raid:1", Duration::from_secs(1), Duration::from_secs(5), || async move {
                        entered.notify_one();
                        tokio::time::sleep(Duration::from_millis(300)).await;
                    })
                    .await
            })
        };

        entered.notified().await;
        let result = backend
            .run_under_lock("raid:1", Duration::ZERO, Duration::from_secs(1), || async { 1 })
            .await;
        assert!(matches!(result, Err(Error::LockTimeout(_))));

        holder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancelling_the_wait_reports_interrupted_not_timeout() {
        let backend = Arc::new(SharedLockBackend::new(store()));
        let entered = Arc::new(tokio::sync::Notify::new());

        let holder = {
            let backend = backend.clone();
            let entered = entered.clone();
            tokio::spawn(async move {
                backend
                    .run_under_lock("raid:2", Duration::from_secs(1), Duration::from_secs(5), || async move {
                        entered.notify_one();
                        tokio::time::sleep(Duration::from_millis(300)).await;
                    })
                    .await
            })
        };

        entered.notified().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = backend
            .run_under_lock_cancellable("raid:2", Duration::from_secs(5), Duration::from_secs(1), &cancel, || async {
                1
            })
            .await;
        assert!(matches!(result, Err(Error::LockInterrupted(_))));

        holder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn non_owner_cannot_release_a_lease_it_never_held() {
        let shared = store();
        assert!(shared.try_acquire_lease("zone:9", "owner-a", Ttl::from_millis(5_000).unwrap()).await.unwrap());
        assert!(!shared.release_lease("zone:9", "owner-b").await.unwrap());
        assert!(shared.release_lease("zone:9", "owner-a").await.unwrap());
    }

    #[tokio::test]
    async fn reentrant_acquisition_on_same_task_does_not_deadlock() {
        let backend = SharedLockBackend::new(store());
        let result = backend
            .run_under_lock("guild:3", Duration::from_secs(1), Duration::from_secs(1), || {
                let backend = &backend;
                async move {
                    backend
                        .run_under_lock("guild:3", Duration::from_secs(1), Duration::from_secs(1), || async { "inner" })
                        .await
                }
            })
            .await;
        assert_eq!(result.unwrap().unwrap(), "inner");
    }
}
