//! In-process lock backend: a `DashMap` of per-key mutexes plus task-local
//! reentrancy tracking, so a task already holding `key` can re-enter
//! `run_under_lock` for the same key without deadlocking (§4.1).

use dashmap::DashMap;
use fabric_base::{Error, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

tokio::task_local! {
    static HELD_DEPTH: RefCell<HashMap<String, u32>>;
}

/// RAII decrement for the reentrant branch of [`LocalLockBackend::run_under_lock`].
struct DepthGuard(String);

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let _ = HELD_DEPTH.try_with(|m| {
            if let Some(depth) = m.borrow_mut().get_mut(&self.0) {
                *depth -= 1;
            }
        });
    }
}

/// Local, in-process lock manager backend (§4.1, §9 "two interchangeable
/// implementations").
#[derive(Default)]
pub struct LocalLockBackend {
    mutexes: DashMap<String, Arc<Mutex<()>>>,
}

impl LocalLockBackend {
    pub fn new() -> Self {
        Self::default()
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
    /// acquisition wait: if it fires before the lock is acquired, the
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
        if HELD_DEPTH.try_with(|_| ()).is_ok() {
            self.run_scoped(key, wait, lease, cancel, body).await
        } else {
            HELD_DEPTH
                .scope(RefCell::new(HashMap::new()), self.run_scoped(key, wait, lease, cancel, body))
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
        let already_held = HELD_DEPTH.with(|m| {
            let mut m = m.borrow_mut();
            match m.get_mut(key) {
                Some(depth) => {
                    *depth += 1;
                    true
                }
                None => false,
            }
        });

        if already_held {
            let _guard = DepthGuard(key.to_string());
            return tokio::time::timeout(lease, body())
                .await
                .map_err(|_| Error::LockTimeout(key.to_string()));
        }

        let mutex = self
            .mutexes
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let owned: OwnedMutexGuard<()> = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(lock.key = key, "lock acquisition wait was cancelled");
                return Err(Error::LockInterrupted(key.to_string()));
            }
            acquired = tokio::time::timeout(wait, mutex.lock_owned()) => match acquired {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!(lock.key = key, wait_millis = wait.as_millis() as u64, "lock acquisition timed out");
                    return Err(Error::LockTimeout(key.to_string()));
                }
            },
        };

        HELD_DEPTH.with(|m| {
            m.borrow_mut().insert(key.to_string(), 1);
        });

        let result = tokio::time::timeout(lease, body()).await;

        HELD_DEPTH.with(|m| {
            m.borrow_mut().remove(key);
        });
        drop(owned);

        if result.is_err() {
            tracing::warn!(lock.key = key, lease_millis = lease.as_millis() as u64, "lock lease expired while body was running");
        }
        result.map_err(|_| Error::LockTimeout(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn wait_zero_on_held_lock_times_out_immediately() {
        let backend = Arc::new(LocalLockBackend::new());
        let entered = Arc::new(tokio::sync::Notify::new());

        let holder = {
            let backend = backend.clone();
            let entered = entered.clone();
            tokio::spawn(async move {
                backend
                    .run_under_lock("player:1", Duration::from_secs(1), Duration::from_secs(5), || async move {
                        entered.notify_one();
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    })
                    .await
            })
        };

        entered.notified().await;
        let result = backend
            .run_under_lock("player:1", Duration::ZERO, Duration::from_secs(1), || async { 1 })
            .await;
        assert!(matches!(result, Err(Error::LockTimeout(_))));

        holder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reentrant_acquisition_on_same_task_does_not_deadlock() {
        let backend = LocalLockBackend::new();
        let count = Arc::new(AtomicU32::new(0));

        let result = backend
            .run_under_lock("guild:7", Duration::from_secs(1), Duration::from_secs(1), || {
                let backend = &backend;
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    backend
                        .run_under_lock("guild:7", Duration::from_secs(1), Duration::from_secs(1), || {
                            let count = count.clone();
                            async move {
                                count.fetch_add(1, Ordering::SeqCst);
                            }
                        })
                        .await
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lease_expiry_cancels_body_and_releases_the_lock() {
        let backend = Arc::new(LocalLockBackend::new());

        let first = backend
            .run_under_lock("npc:9", Duration::from_secs(1), Duration::from_millis(50), || async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
            .await;
        assert!(matches!(first, Err(Error::LockTimeout(_))));

        // The lease expiry must have dropped the guard; a fresh acquisition
        // should succeed immediately rather than waiting on the first call.
        let second = backend
            .run_under_lock("npc:9", Duration::from_millis(10), Duration::from_secs(1), || async { 42 })
            .await;
        assert_eq!(second.unwrap(), 42);
    }

    #[tokio::test]
    async fn cancelling_the_wait_reports_interrupted_not_timeout() {
        let backend = Arc::new(LocalLockBackend::new());
        let entered = Arc::new(tokio::sync::Notify::new());

        let holder = {
            let backend = backend.clone();
            let entered = entered.clone();
            tokio::spawn(async move {
                backend
                    .run_under_lock("arena:5", Duration::from_secs(1), Duration::from_secs(5), || async move {
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
            .run_under_lock_cancellable("arena:5", Duration::from_secs(5), Duration::from_secs(1), &cancel, || async {
                1
            })
            .await;
        assert!(matches!(result, Err(Error::LockInterrupted(_))));

        holder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let backend = LocalLockBackend::new();
        let a = backend.run_under_lock("a", Duration::from_secs(1), Duration::from_secs(1), || async { "a" });
        let b = backend.run_under_lock("b", Duration::from_secs(1), Duration::from_secs(1), || async { "b" });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
    }
}
