//! Distributed lock over store leases.
//!
//! A lock is a lease record in the shared store. Acquisition retries with
//! exponential backoff until the configured wait timeout or the caller's
//! cancellation fires. While held, a background task keeps extending the
//! lease; the returned [`LockGuard`] stops that task and releases the lease
//! when dropped, so the lock is given back on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bench_core::Cancellation;
use bench_core::config::{LockConfig, duration_field};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::store::KvStore;

/// Timing for lock acquisition and lease upkeep.
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub key_prefix: String,
    pub lease_ttl: Duration,
    pub extend_interval: Duration,
    pub retry_initial: Duration,
    pub retry_max: Duration,
    pub wait_timeout: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            key_prefix: "lock:".to_string(),
            lease_ttl: Duration::from_secs(5),
            extend_interval: Duration::from_secs(1),
            retry_initial: Duration::from_millis(50),
            retry_max: Duration::from_secs(1),
            wait_timeout: Duration::from_secs(30),
        }
    }
}

impl LockOptions {
    pub fn from_config(config: &LockConfig) -> anyhow::Result<Self> {
        Ok(Self {
            key_prefix: config.key_prefix.clone(),
            lease_ttl: duration_field("lock.lease_ttl", &config.lease_ttl)?,
            extend_interval: duration_field("lock.extend_interval", &config.extend_interval)?,
            retry_initial: duration_field("lock.retry_initial", &config.retry_initial)?,
            retry_max: duration_field("lock.retry_max", &config.retry_max)?,
            wait_timeout: duration_field("lock.wait_timeout", &config.wait_timeout)?,
        })
    }
}

/// Hands out named locks backed by a [`KvStore`].
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    options: LockOptions,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>, options: LockOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Wait for the lock `name`, giving up on timeout or cancellation.
    pub async fn acquire(&self, name: &str, cancel: &Cancellation) -> StateResult<LockGuard> {
        let key = format!("{}{}", self.options.key_prefix, name);
        let holder = bench_core::new_id();
        let started = Instant::now();
        let mut backoff = self.options.retry_initial;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if self
                .store
                .lease_acquire(&key, &holder, self.options.lease_ttl)?
            {
                debug!(%key, %holder, attempts, "lock acquired");
                return Ok(self.guard(key, holder));
            }

            let waited = started.elapsed();
            if waited >= self.options.wait_timeout {
                warn!(%key, attempts, ?waited, "lock wait timed out");
                return Err(StateError::LockTimeout { key, waited });
            }
            let sleep_for = backoff.min(self.options.wait_timeout - waited);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = cancel.cancelled() => {
                    info!(%key, attempts, "lock wait cancelled");
                    return Err(StateError::Cancelled(key));
                }
            }
            backoff = (backoff * 2).min(self.options.retry_max);
        }
    }

    fn guard(&self, key: String, holder: String) -> LockGuard {
        let lost = Arc::new(AtomicBool::new(false));
        let extender = tokio::spawn(extend_loop(
            self.store.clone(),
            key.clone(),
            holder.clone(),
            self.options.lease_ttl,
            self.options.extend_interval,
            lost.clone(),
        ));
        LockGuard {
            store: self.store.clone(),
            key,
            holder,
            lost,
            extender: Some(extender),
        }
    }
}

async fn extend_loop(
    store: Arc<dyn KvStore>,
    key: String,
    holder: String,
    ttl: Duration,
    interval: Duration,
    lost: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match store.lease_extend(&key, &holder, ttl) {
            Ok(true) => debug!(%key, "lock lease extended"),
            Ok(false) => {
                warn!(%key, %holder, "lock lease lost");
                lost.store(true, Ordering::SeqCst);
                return;
            }
            Err(e) => warn!(%key, error = %e, "lock lease extension failed"),
        }
    }
}

/// A held lock. Releases the lease on drop.
pub struct LockGuard {
    store: Arc<dyn KvStore>,
    key: String,
    holder: String,
    lost: Arc<AtomicBool>,
    extender: Option<JoinHandle<()>>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fails if the lease expired or was taken over while held.
    pub fn check_held(&self) -> StateResult<()> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(StateError::LockLost(self.key.clone()));
        }
        Ok(())
    }

    /// Release explicitly, surfacing store errors instead of logging them.
    pub fn release(mut self) -> StateResult<()> {
        self.stop_extender();
        let released = self.store.lease_release(&self.key, &self.holder);
        // Disarm Drop; the lease is already handled.
        self.holder.clear();
        match released {
            Ok(true) => {
                debug!(key = %self.key, "lock released");
                Ok(())
            }
            Ok(false) => Err(StateError::LockLost(self.key.clone())),
            Err(e) => Err(e),
        }
    }

    fn stop_extender(&mut self) {
        if let Some(handle) = self.extender.take() {
            handle.abort();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.stop_extender();
        if self.holder.is_empty() {
            return;
        }
        match self.store.lease_release(&self.key, &self.holder) {
            Ok(true) => debug!(key = %self.key, "lock released"),
            Ok(false) => warn!(key = %self.key, "lock was not held at release"),
            Err(e) => warn!(key = %self.key, error = %e, "lock release failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateStore;

    fn fast_options() -> LockOptions {
        LockOptions {
            key_prefix: "lock:".to_string(),
            lease_ttl: Duration::from_millis(300),
            extend_interval: Duration::from_millis(50),
            retry_initial: Duration::from_millis(5),
            retry_max: Duration::from_millis(20),
            wait_timeout: Duration::from_millis(200),
        }
    }

    fn test_lock() -> (Arc<StateStore>, DistributedLock) {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let lock = DistributedLock::new(store.clone(), fast_options());
        (store, lock)
    }

    #[tokio::test]
    async fn drop_releases_lease() {
        let (store, lock) = test_lock();
        let guard = lock.acquire("net", &Cancellation::never()).await.unwrap();
        assert_eq!(guard.key(), "lock:net");
        assert!(store.lease_get("lock:net").unwrap().is_some());
        drop(guard);
        assert!(store.lease_get("lock:net").unwrap().is_none());
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let (_store, lock) = test_lock();
        let _held = lock.acquire("net", &Cancellation::never()).await.unwrap();
        let r = lock.acquire("net", &Cancellation::never()).await;
        assert!(matches!(r, Err(StateError::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn waiter_gets_lock_after_release() {
        let (_store, lock) = test_lock();
        let held = lock.acquire("net", &Cancellation::never()).await.unwrap();
        let waiter = tokio::spawn({
            let lock = lock.clone();
            async move { lock.acquire("net", &Cancellation::never()).await.map(|_| ()) }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        held.release().unwrap();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let (_store, lock) = test_lock();
        let _held = lock.acquire("net", &Cancellation::never()).await.unwrap();
        let (handle, cancel) = Cancellation::pair();
        handle.cancel();
        let r = lock.acquire("net", &cancel).await;
        assert!(matches!(r, Err(StateError::Cancelled(_))));
    }

    #[tokio::test]
    async fn lease_is_extended_while_held() {
        let (store, lock) = test_lock();
        let guard = lock.acquire("net", &Cancellation::never()).await.unwrap();
        // Outlive the 300ms ttl; the extender keeps it alive.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let lease = store.lease_get("lock:net").unwrap().unwrap();
        assert!(!lease.is_expired());
        guard.check_held().unwrap();
    }

    #[tokio::test]
    async fn takeover_marks_guard_lost() {
        let (store, lock) = test_lock();
        let guard = lock.acquire("net", &Cancellation::never()).await.unwrap();
        store.lease_release("lock:net", &guard.holder).unwrap();
        store
            .lease_acquire("lock:net", "intruder", Duration::from_secs(5))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(matches!(guard.check_held(), Err(StateError::LockLost(_))));
    }
}
