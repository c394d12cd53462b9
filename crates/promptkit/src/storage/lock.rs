//! Per-key mutual exclusion for backends without native transactions.
//!
//! [`KeyedMutex`] hands out one FIFO queue per key. Callers on the same key
//! are admitted in arrival order; callers on different keys never wait on
//! each other. A store-wide guard ([`KeyedMutex::acquire_all`]) excludes
//! every key at once and is used by `clear`.
//!
//! # Release
//!
//! Guards release on drop, so every exit path (early return, `?`, panic,
//! cancellation) gives the key back. [`KeyGuard::release`] may also be called
//! explicitly and is idempotent.
//!
//! # Timeouts
//!
//! Both waiting for a key and holding it are bounded by [`LockConfig`]. When
//! the wait bound elapses the waiter gets [`Error::LockTimeout`].
//!
//! Every grant carries a lease that runs out after the hold bound. A waiter
//! that finds an expired lease evicts it: the key gets a fresh queue and the
//! stale guard no longer excludes anyone. Releasing a stale guard later is a
//! no-op. Inside [`KeyedMutex::with_lock`] the guarded future is also dropped
//! at the hold bound and the caller gets [`Error::LockTimeout`]. The effects
//! of a timed-out operation are undefined.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

/// Default bound on waiting for, and holding, a key.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Key reported in timeout errors for store-wide acquisitions.
pub const ALL_KEYS: &str = "*";

/// Timeout settings for a [`KeyedMutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Maximum time to wait for a key to become free.
    pub acquire_timeout: Duration,
    /// Maximum time a key may be held before waiters force it free.
    pub hold_timeout: Duration,
}

impl LockConfig {
    /// Uses the same bound for waiting and holding.
    #[must_use]
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            acquire_timeout: timeout,
            hold_timeout: timeout,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::uniform(DEFAULT_LOCK_TIMEOUT)
    }
}

/// `now + bound`, saturating far in the future for oversized bounds.
fn after(bound: Duration) -> Instant {
    const FAR: Duration = Duration::from_secs(60 * 60 * 24 * 365);
    let now = Instant::now();
    now.checked_add(bound).unwrap_or(now + FAR)
}

/// Current grant on a key. Owns the holder's share of the store lock so
/// eviction gives that share back too.
#[derive(Debug)]
struct Lease {
    id: u64,
    expires: Instant,
    _shared: OwnedRwLockReadGuard<()>,
}

#[derive(Debug)]
struct Slot {
    queue: Arc<Mutex<()>>,
    lease: Option<Lease>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            queue: Arc::new(Mutex::new(())),
            lease: None,
        }
    }
}

#[derive(Debug)]
struct StoreLease {
    id: u64,
    expires: Instant,
    _guard: OwnedRwLockWriteGuard<()>,
}

#[derive(Debug)]
struct Inner {
    config: LockConfig,
    slots: StdMutex<HashMap<String, Slot>>,
    store: Arc<RwLock<()>>,
    store_lease: StdMutex<Option<StoreLease>>,
    next_id: AtomicU64,
}

impl Inner {
    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_lease(&self) -> std::sync::MutexGuard<'_, Option<StoreLease>> {
        self.store_lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue for `key` and the expiry of its current lease.
    fn entry(&self, key: &str) -> (Arc<Mutex<()>>, Option<Instant>) {
        let mut slots = self.slots();
        let slot = slots.entry(key.to_string()).or_default();
        (Arc::clone(&slot.queue), slot.lease.as_ref().map(|l| l.expires))
    }

    /// Records a lease for the holder of `queue`. Returns `None` when the
    /// queue was evicted while the caller waited on it.
    fn grant(
        &self,
        key: &str,
        queue: &Arc<Mutex<()>>,
        shared: OwnedRwLockReadGuard<()>,
    ) -> Option<u64> {
        let mut slots = self.slots();
        let slot = slots.get_mut(key)?;
        if !Arc::ptr_eq(&slot.queue, queue) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        slot.lease = Some(Lease {
            id,
            expires: after(self.config.hold_timeout),
            _shared: shared,
        });
        Some(id)
    }

    /// Ends lease `id` on `key` if it is still the current one.
    fn end_lease(&self, key: &str, id: u64) {
        let mut slots = self.slots();
        if let Some(slot) = slots.get_mut(key)
            && slot.lease.as_ref().is_some_and(|l| l.id == id)
        {
            slot.lease = None;
        }
    }

    /// Swaps in a fresh queue for `key` if `queue` is current and its lease
    /// has run out.
    fn evict_if_expired(&self, key: &str, queue: &Arc<Mutex<()>>) {
        let mut slots = self.slots();
        if let Some(slot) = slots.get_mut(key)
            && Arc::ptr_eq(&slot.queue, queue)
            && slot.lease.as_ref().is_some_and(|l| l.expires <= Instant::now())
        {
            *slot = Slot::default();
            warn!(key, hold = ?self.config.hold_timeout, "Key lock held past its lease; force-released");
        }
    }

    fn evict_expired_keys(&self) {
        let now = Instant::now();
        let mut slots = self.slots();
        for (key, slot) in slots.iter_mut() {
            if slot.lease.as_ref().is_some_and(|l| l.expires <= now) {
                *slot = Slot::default();
                warn!(key, "Key lock held past its lease; force-released");
            }
        }
    }

    fn earliest_key_expiry(&self) -> Option<Instant> {
        self.slots()
            .values()
            .filter_map(|slot| slot.lease.as_ref().map(|l| l.expires))
            .min()
    }

    fn store_expiry(&self) -> Option<Instant> {
        self.store_lease().as_ref().map(|l| l.expires)
    }

    fn evict_store_if_expired(&self) {
        let mut lease = self.store_lease();
        if lease.as_ref().is_some_and(|l| l.expires <= Instant::now()) {
            *lease = None;
            warn!(hold = ?self.config.hold_timeout, "Store-wide lock held past its lease; force-released");
        }
    }

    /// Drops the slot for `key` once nobody holds or waits on it.
    fn prune(&self, key: &str) {
        let mut slots = self.slots();
        if slots
            .get(key)
            .is_some_and(|slot| slot.lease.is_none() && Arc::strong_count(&slot.queue) == 1)
        {
            slots.remove(key);
        }
    }

    fn timeout_error(&self, key: &str) -> Error {
        Error::LockTimeout {
            key: key.to_string(),
            timeout: self.config.acquire_timeout,
        }
    }
}

/// Per-key async mutex with FIFO admission and bounded waits.
///
/// Cloning shares the same lock table.
#[derive(Debug, Clone)]
pub struct KeyedMutex {
    inner: Arc<Inner>,
}

impl KeyedMutex {
    /// Creates a lock table with the given timeouts.
    #[must_use]
    pub fn new(config: LockConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                slots: StdMutex::new(HashMap::new()),
                store: Arc::new(RwLock::new(())),
                store_lease: StdMutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the timeout settings.
    #[must_use]
    pub fn config(&self) -> LockConfig {
        self.inner.config
    }

    /// Waits for exclusive access to `key`.
    ///
    /// A holder whose lease has run out is forced off the key rather than
    /// waited on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if the key is not free within the
    /// configured acquire timeout.
    pub async fn acquire(&self, key: &str) -> Result<KeyGuard> {
        let deadline = after(self.inner.config.acquire_timeout);

        loop {
            let wake = self.inner.store_expiry().map_or(deadline, |e| e.min(deadline));
            let Ok(shared) = timeout_at(wake, Arc::clone(&self.inner.store).read_owned()).await
            else {
                if Instant::now() >= deadline {
                    warn!(key, timeout = ?self.inner.config.acquire_timeout, "Timed out waiting for key lock");
                    return Err(self.inner.timeout_error(key));
                }
                self.inner.evict_store_if_expired();
                continue;
            };

            let (queue, expiry) = self.inner.entry(key);
            let wake = expiry.map_or(deadline, |e| e.min(deadline));
            match timeout_at(wake, Arc::clone(&queue).lock_owned()).await {
                Ok(exclusive) => {
                    if let Some(lease) = self.inner.grant(key, &queue, shared) {
                        debug!(key, "Acquired key lock");
                        return Ok(KeyGuard {
                            key: key.to_string(),
                            lease,
                            exclusive: Some(exclusive),
                            owner: Arc::clone(&self.inner),
                        });
                    }
                    // Evicted while waiting; queue again on the fresh slot.
                }
                Err(_) => {
                    drop(shared);
                    if Instant::now() >= deadline {
                        drop(queue);
                        self.inner.prune(key);
                        warn!(key, timeout = ?self.inner.config.acquire_timeout, "Timed out waiting for key lock");
                        return Err(self.inner.timeout_error(key));
                    }
                    self.inner.evict_if_expired(key, &queue);
                }
            }
        }
    }

    /// Waits until no key is held, then excludes every key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if outstanding holders do not finish
    /// within the configured acquire timeout.
    pub async fn acquire_all(&self) -> Result<StoreGuard> {
        let deadline = after(self.inner.config.acquire_timeout);

        loop {
            let wake = self
                .inner
                .earliest_key_expiry()
                .map_or(deadline, |e| e.min(deadline));
            match timeout_at(wake, Arc::clone(&self.inner.store).write_owned()).await {
                Ok(guard) => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    *self.inner.store_lease() = Some(StoreLease {
                        id,
                        expires: after(self.inner.config.hold_timeout),
                        _guard: guard,
                    });
                    debug!("Acquired store-wide lock");
                    return Ok(StoreGuard {
                        lease: Some(id),
                        owner: Arc::clone(&self.inner),
                    });
                }
                Err(_) if Instant::now() >= deadline => {
                    warn!(timeout = ?self.inner.config.acquire_timeout, "Timed out waiting for store-wide lock");
                    return Err(self.inner.timeout_error(ALL_KEYS));
                }
                Err(_) => self.inner.evict_expired_keys(),
            }
        }
    }

    /// Runs `op` while holding `key`, bounded by the hold timeout.
    ///
    /// Errors from `op` are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if the key cannot be acquired or `op`
    /// overruns the hold timeout, otherwise whatever `op` returns.
    pub async fn with_lock<F, T>(&self, key: &str, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guard = self.acquire(key).await?;
        let hold = self.inner.config.hold_timeout;
        let outcome = tokio::time::timeout(hold, op).await;
        drop(guard);

        outcome.unwrap_or_else(|_| {
            warn!(key, ?hold, "Operation overran key lock; released");
            Err(Error::LockTimeout {
                key: key.to_string(),
                timeout: hold,
            })
        })
    }

    /// Runs `op` while excluding every key.
    ///
    /// # Errors
    ///
    /// Same as [`with_lock`](Self::with_lock), reported against [`ALL_KEYS`].
    pub async fn with_all<F, T>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guard = self.acquire_all().await?;
        let hold = self.inner.config.hold_timeout;
        let outcome = tokio::time::timeout(hold, op).await;
        drop(guard);

        outcome.unwrap_or_else(|_| {
            warn!(?hold, "Store-wide operation overran lock; released");
            Err(Error::LockTimeout {
                key: ALL_KEYS.to_string(),
                timeout: hold,
            })
        })
    }

    /// Number of keys with a live queue. Used by tests to check cleanup.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.inner.slots().len()
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

/// Exclusive hold on one key. Released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    lease: u64,
    exclusive: Option<OwnedMutexGuard<()>>,
    owner: Arc<Inner>,
}

impl KeyGuard {
    /// The key this guard holds.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the key now. Calling it again is a no-op, and so is calling
    /// it after the lease was force-released.
    pub fn release(&mut self) {
        if let Some(exclusive) = self.exclusive.take() {
            self.owner.end_lease(&self.key, self.lease);
            drop(exclusive);
            self.owner.prune(&self.key);
            debug!(key = %self.key, "Released key lock");
        }
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Store-wide exclusive hold. Released on drop.
#[derive(Debug)]
pub struct StoreGuard {
    lease: Option<u64>,
    owner: Arc<Inner>,
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        if let Some(id) = self.lease.take() {
            let mut lease = self.owner.store_lease();
            if lease.as_ref().is_some_and(|l| l.id == id) {
                *lease = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Short waits, holds long enough never to expire mid-test.
    fn short_locks() -> KeyedMutex {
        KeyedMutex::new(LockConfig {
            acquire_timeout: Duration::from_millis(100),
            hold_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    fn short_leases(acquire_ms: u64, hold_ms: u64) -> KeyedMutex {
        KeyedMutex::new(LockConfig {
            acquire_timeout: Duration::from_millis(acquire_ms),
            hold_timeout: Duration::from_millis(hold_ms),
        })
    }

    #[tokio::test]
    async fn same_key_callers_are_serialized() {
        let locks = KeyedMutex::default();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                locks
                    .with_lock("history", async {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn admission_is_fifo() {
        let locks = KeyedMutex::default();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let first = locks.acquire("k").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..5 {
            let locks = locks.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("k").await.unwrap();
                order.lock().unwrap().push(i);
            }));
            // Let each waiter enqueue before spawning the next.
            tokio::task::yield_now().await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = short_locks();
        let _held = locks.acquire("templates").await.unwrap();

        let other = locks.acquire("models").await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let locks = short_locks();
        let mut guard = locks.acquire("k").await.unwrap();
        guard.release();
        guard.release();
        drop(guard);

        let again = locks.acquire("k").await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn waiter_times_out_while_key_is_held() {
        let locks = short_locks();
        let _held = locks.acquire("k").await.unwrap();

        let err = locks.acquire("k").await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout { ref key, .. } if key == "k"));
    }

    #[tokio::test]
    async fn overrunning_section_is_cut_off_and_released() {
        let locks = KeyedMutex::new(LockConfig::uniform(Duration::from_millis(100)));

        let err = locks
            .with_lock("k", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));

        assert!(locks.acquire("k").await.is_ok());
    }

    #[tokio::test]
    async fn failing_section_still_releases() {
        let locks = short_locks();

        let result: Result<()> = locks
            .with_lock("k", async { Err(Error::Validation("boom".into())) })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        assert!(locks.acquire("k").await.is_ok());
    }

    #[tokio::test]
    async fn store_guard_excludes_every_key() {
        let locks = short_locks();
        let all = locks.acquire_all().await.unwrap();

        assert!(locks.acquire("anything").await.is_err());
        drop(all);
        assert!(locks.acquire("anything").await.is_ok());
    }

    #[tokio::test]
    async fn idle_keys_are_pruned() {
        let locks = KeyedMutex::default();
        {
            let _a = locks.acquire("a").await.unwrap();
            let _b = locks.acquire("b").await.unwrap();
            assert_eq!(locks.active_keys(), 2);
        }
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn forgotten_guard_is_forced_out_after_its_lease() {
        let locks = short_leases(50, 50);
        let stale = locks.acquire("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(locks.acquire("k").await.is_ok());
        assert!(locks.acquire("k").await.is_ok());
        drop(stale);
    }

    #[tokio::test]
    async fn waiter_is_admitted_when_the_lease_runs_out() {
        let locks = short_leases(500, 50);
        let _stale = locks.acquire("k").await.unwrap();

        let next = locks.acquire("k").await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn stale_release_leaves_the_new_holder_alone() {
        let locks = short_leases(50, 150);
        let stale = locks.acquire("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _current = locks.acquire("k").await.unwrap();

        drop(stale);

        assert!(locks.acquire("k").await.is_err());
    }

    #[tokio::test]
    async fn expired_store_guard_is_forced_out() {
        let locks = short_leases(50, 50);
        let stale = locks.acquire_all().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(locks.acquire("k").await.is_ok());
        drop(stale);
        assert!(locks.acquire_all().await.is_ok());
    }

    #[tokio::test]
    async fn expired_key_holder_does_not_block_store_lock() {
        let locks = short_leases(50, 50);
        let _stale = locks.acquire("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(locks.acquire_all().await.is_ok());
    }
}
