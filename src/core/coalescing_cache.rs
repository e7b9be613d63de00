//! TTL cache that deduplicates concurrent fills.
//!
//! Host facts are gathered by spawning external processes. When several
//! requests want the same cold key at once only one fill runs; everyone who
//! asked while it was in flight receives a clone of its value, in the order
//! they asked.

use dashmap::DashMap;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache fill for key {0} was aborted")]
    FillAborted(String),
}

/// Hit/miss counters, in the spirit of the cache stats the agent exposes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fills: u64,
    pub coalesced: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total_requests = self.hits + self.misses;
        if total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / total_requests as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fills: AtomicU64,
    coalesced: AtomicU64,
}

struct CacheSlot<V> {
    value: Option<V>,
    /// `None` means stale: either never filled or explicitly expired.
    fresh_until: Option<Instant>,
    /// Bumped by every expiry so a fill that started earlier can tell its
    /// value is already out of date.
    generation: u64,
    /// `Some` while a fill is in flight; holds everyone waiting on it.
    waiters: Option<Vec<oneshot::Sender<V>>>,
}

impl<V> Default for CacheSlot<V> {
    fn default() -> Self {
        Self {
            value: None,
            fresh_until: None,
            generation: 0,
            waiters: None,
        }
    }
}

impl<V> CacheSlot<V> {
    fn fresh_value(&self, now: Instant) -> Option<&V> {
        match (&self.value, self.fresh_until) {
            (Some(value), Some(until)) if now < until => Some(value),
            _ => None,
        }
    }
}

type SlotTable<K, V> = DashMap<K, CacheSlot<V>>;

pub struct CoalescingCache<K, V>
where
    K: Eq + Hash,
{
    slots: Arc<SlotTable<K, V>>,
    counters: Arc<Counters>,
}

impl<K, V> Clone for CoalescingCache<K, V>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<K, V> Default for CoalescingCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CoalescingCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Return the cached value for `key`, filling it with `fill` if it is
    /// missing or stale.
    ///
    /// At most one fill per key runs at a time. The fill runs on its own
    /// task, so a caller that goes away does not strand the others.
    pub async fn get<F, Fut>(&self, key: K, fill: F, ttl: Duration) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (rx, start_fill) = {
            let mut slot = self.slots.entry(key.clone()).or_default();

            if let Some(value) = slot.fresh_value(Instant::now()) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = ?key, "Cache hit");
                return Ok(value.clone());
            }
            self.counters.misses.fetch_add(1, Ordering::Relaxed);

            let (tx, rx) = oneshot::channel();
            match slot.waiters.as_mut() {
                Some(waiters) => {
                    waiters.push(tx);
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(key = ?key, waiting = waiters.len(), "Cache fill in flight, waiting");
                    (rx, None)
                }
                None => {
                    slot.waiters = Some(vec![tx]);
                    (rx, Some(slot.generation))
                }
            }
        };

        if let Some(generation) = start_fill {
            self.spawn_fill(key.clone(), fill, ttl, generation);
        }

        rx.await.map_err(|_| CacheError::FillAborted(format!("{:?}", key)))
    }

    fn spawn_fill<F, Fut>(&self, key: K, fill: F, ttl: Duration, generation: u64)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.counters.fills.fetch_add(1, Ordering::Relaxed);
        let slots = Arc::clone(&self.slots);

        tokio::spawn(async move {
            let mut abort_guard = FillAbortGuard {
                slots: Arc::clone(&slots),
                key: Some(key.clone()),
            };

            debug!(key = ?key, "Cache fill started");
            let value = fill().await;

            let waiters = {
                let mut slot = slots.entry(key.clone()).or_default();
                let now = Instant::now();
                slot.fresh_until = if slot.generation == generation {
                    Some(now.checked_add(ttl).unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64)))
                } else {
                    // Expired while the fill was running.
                    None
                };
                slot.value = Some(value.clone());
                slot.waiters.take().unwrap_or_default()
            };
            abort_guard.disarm();

            debug!(key = ?key, waiters = waiters.len(), "Cache fill completed");
            for waiter in waiters {
                let _ = waiter.send(value.clone());
            }
        });
    }

    /// The fresh value for `key`, if there is one. Never starts a fill.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.slots
            .get(key)
            .and_then(|slot| slot.fresh_value(Instant::now()).cloned())
    }

    /// Force the next `get` for `key` to refill.
    pub fn expire(&self, key: &K) {
        if let Some(mut slot) = self.slots.get_mut(key) {
            slot.fresh_until = None;
            slot.generation += 1;
        }
    }

    pub fn expire_all(&self) {
        for mut slot in self.slots.iter_mut() {
            slot.fresh_until = None;
            slot.generation += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fills: self.counters.fills.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
        }
    }
}

/// Clears the in-flight marker if a fill task unwinds, so waiters are told
/// the fill was aborted and the next `get` can start a new one.
struct FillAbortGuard<K, V>
where
    K: Eq + Hash + Debug,
{
    slots: Arc<SlotTable<K, V>>,
    key: Option<K>,
}

impl<K, V> FillAbortGuard<K, V>
where
    K: Eq + Hash + Debug,
{
    fn disarm(&mut self) {
        self.key = None;
    }
}

impl<K, V> Drop for FillAbortGuard<K, V>
where
    K: Eq + Hash + Debug,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            error!(key = ?key, "Cache fill aborted");
            let waiters = self.slots.get_mut(&key).and_then(|mut slot| slot.waiters.take());
            drop(waiters);
        }
    }
}
