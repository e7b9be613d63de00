//! Named, FIFO-fair asynchronous locks.
//!
//! Every job that touches a resource runs while holding the lock named by
//! its composite key (`Kind:name`). Waiting never blocks a worker thread:
//! a queued acquisition is a parked future that is woken when the previous
//! holder releases.
//!
//! # Releasing
//!
//! A [`LockGuard`] must be released exactly once on every exit path. A
//! guard that is never released wedges every later job for that key, so
//! the guard releases itself on drop and [`LockGuard::release`] is
//! idempotent: calling it twice hands the lock to at most one waiter.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Default)]
struct LockSlot {
    held: bool,
    waiters: VecDeque<oneshot::Sender<LockGuard>>,
}

type LockTable = DashMap<String, LockSlot>;

/// Process-wide table of named locks. Cloning yields another handle to the
/// same table.
#[derive(Clone, Default)]
pub struct LockManager {
    table: Arc<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the queue for `key` without waiting.
    ///
    /// The queue position is fixed by the time this returns, so callers that
    /// invoke `lock` in a given order are granted the lock in that order no
    /// matter when they start awaiting.
    pub fn lock(&self, key: impl Into<String>) -> PendingLock {
        let key = key.into();
        let mut slot = self.table.entry(key.clone()).or_default();

        if !slot.held {
            slot.held = true;
            drop(slot);
            debug!(lock = %key, "Lock granted");
            let guard = LockGuard::new(Arc::clone(&self.table), key.clone());
            return PendingLock {
                key,
                state: PendingState::Granted(guard),
            };
        }

        let (tx, rx) = oneshot::channel();
        slot.waiters.push_back(tx);
        let position = slot.waiters.len();
        drop(slot);

        debug!(lock = %key, position, "Lock held, queued");
        PendingLock {
            key,
            state: PendingState::Waiting(rx),
        }
    }

    /// Wait until the lock named `key` is granted.
    pub async fn acquire(&self, key: impl Into<String>) -> LockGuard {
        self.lock(key).acquired().await
    }

    /// Run `f` while holding `key`. The lock is released however `f` ends,
    /// including by panic.
    pub async fn with_lock<F, Fut, T>(&self, key: impl Into<String>, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut guard = self.acquire(key).await;
        let result = f().await;
        guard.release();
        result
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.table.get(key).map(|slot| slot.held).unwrap_or(false)
    }

    /// Number of acquisitions queued behind the current holder.
    pub fn queue_len(&self, key: &str) -> usize {
        self.table.get(key).map(|slot| slot.waiters.len()).unwrap_or(0)
    }

    /// Number of lock slots currently in the table, idle ones included.
    pub fn lock_count(&self) -> usize {
        self.table.len()
    }

    /// Drop slots that are free and have nobody queued. Returns how many
    /// were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.table.len();
        self.table.retain(|_, slot| slot.held || !slot.waiters.is_empty());
        let pruned = before.saturating_sub(self.table.len());
        if pruned > 0 {
            debug!(pruned, "Pruned idle lock slots");
        }
        pruned
    }
}

/// Hand the lock for `key` to the next live waiter, or mark it free.
fn release_key(table: &Arc<LockTable>, key: &str) {
    loop {
        // The slot reference must be gone before a guard can be dropped
        // below, since dropping a guard re-enters the table.
        let next = {
            let Some(mut slot) = table.get_mut(key) else {
                return;
            };
            match slot.waiters.pop_front() {
                Some(waiter) => waiter,
                None => {
                    slot.held = false;
                    debug!(lock = %key, "Lock released");
                    return;
                }
            }
        };

        match next.send(LockGuard::new(Arc::clone(table), key.to_string())) {
            Ok(()) => {
                debug!(lock = %key, "Lock handed to next waiter");
                return;
            }
            Err(mut orphan) => {
                // The waiter gave up before its turn; move on to the next one.
                orphan.released = true;
            }
        }
    }
}

enum PendingState {
    Granted(LockGuard),
    Waiting(oneshot::Receiver<LockGuard>),
}

/// A place in a lock queue. Dropping it before the grant gives up the
/// place; a grant that arrives after that is passed on to the next waiter.
#[must_use = "a pending lock does nothing unless awaited with `acquired`"]
pub struct PendingLock {
    key: String,
    state: PendingState,
}

impl PendingLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True when the lock was free at the time `lock` was called.
    pub fn is_granted(&self) -> bool {
        matches!(self.state, PendingState::Granted(_))
    }

    pub async fn acquired(self) -> LockGuard {
        match self.state {
            PendingState::Granted(guard) => guard,
            PendingState::Waiting(rx) => match rx.await {
                Ok(guard) => guard,
                // Senders are only dropped after a send attempt, and the
                // table outlives every queued waiter.
                Err(_) => unreachable!("lock queue for '{}' dropped a waiter", self.key),
            },
        }
    }
}

/// Proof of holding a named lock.
#[must_use = "dropping a guard releases the lock immediately"]
pub struct LockGuard {
    table: Arc<LockTable>,
    key: String,
    released: bool,
}

impl LockGuard {
    fn new(table: Arc<LockTable>, key: String) -> Self {
        Self {
            table,
            key,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the lock. Only the first call has any effect.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        release_key(&self.table, &self.key);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_first_acquirer_is_granted_immediately() {
        let locks = LockManager::new();

        let pending = locks.lock("Instance:foo");
        assert!(pending.is_granted());

        let guard = pending.acquired().await;
        assert_eq!(guard.key(), "Instance:foo");
        assert!(locks.is_locked("Instance:foo"));

        drop(guard);
        assert!(!locks.is_locked("Instance:foo"));
        // The slot is kept around for reuse.
        assert_eq!(locks.lock_count(), 1);
    }

    #[tokio::test]
    async fn test_grants_are_fifo() {
        let locks = LockManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let holder = locks.acquire("Instance:foo").await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let pending = locks.lock("Instance:foo");
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = pending.acquired().await;
                order.lock().await.push(i);
            }));
        }
        assert_eq!(locks.queue_len("Instance:foo"), 5);

        drop(holder);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
        assert!(!locks.is_locked("Instance:foo"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion_under_contention() {
        let locks = LockManager::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let locks = locks.clone();
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                locks
                    .with_lock("SigningRequest:host", || async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let locks = LockManager::new();

        let _instance = locks.acquire("Instance:foo").await;
        let other = locks.lock("SigningRequest:foo");

        assert!(other.is_granted());
    }

    #[tokio::test]
    async fn test_double_release_grants_one_waiter() {
        let locks = LockManager::new();

        let mut holder = locks.acquire("Instance:foo").await;
        let first = locks.lock("Instance:foo");
        let second = locks.lock("Instance:foo");

        holder.release();
        holder.release();
        assert!(holder.is_released());

        let mut first_guard = first.acquired().await;
        let second_waiting = tokio::time::timeout(Duration::from_millis(50), second.acquired()).await;
        assert!(second_waiting.is_err(), "second waiter must not share the lock");

        first_guard.release();
        assert!(!locks.is_locked("Instance:foo"));
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_skipped() {
        let locks = LockManager::new();

        let holder = locks.acquire("Bundle:app@1.0").await;
        let abandoned = locks.lock("Bundle:app@1.0");
        let next = locks.lock("Bundle:app@1.0");
        drop(abandoned);

        drop(holder);
        let guard = tokio::time::timeout(Duration::from_secs(1), next.acquired())
            .await
            .expect("live waiter should be granted");
        assert!(locks.is_locked("Bundle:app@1.0"));
        drop(guard);
        assert!(!locks.is_locked("Bundle:app@1.0"));
    }

    #[tokio::test]
    async fn test_panicking_holder_releases() {
        let locks = LockManager::new();

        let task_locks = locks.clone();
        let result = tokio::spawn(async move {
            task_locks
                .with_lock("Service:web", || async {
                    if true {
                        panic!("action blew up");
                    }
                })
                .await
        })
        .await;
        assert!(result.is_err());

        let guard = tokio::time::timeout(Duration::from_secs(1), locks.acquire("Service:web"))
            .await
            .expect("lock must not stay wedged");
        drop(guard);
    }

    #[tokio::test]
    async fn test_prune_idle_keeps_busy_slots() {
        let locks = LockManager::new();

        drop(locks.acquire("Instance:a").await);
        let _busy = locks.acquire("Instance:b").await;
        assert_eq!(locks.lock_count(), 2);

        assert_eq!(locks.prune_idle(), 1);
        assert_eq!(locks.lock_count(), 1);
        assert!(locks.is_locked("Instance:b"));
    }
}
