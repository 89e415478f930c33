// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Thread-safe LRU cache with per-entry TTL and a periodic expiry sweep.
//!
//! Two cache flavors live here: the general-purpose [`Cache`] used to
//! memoize message translation and tool-schema validation, and
//! [`QuotaCache`], a thin wrapper that deep-copies values on both `get` and
//! `set` so callers can never mutate a shared snapshot through their
//! reference.
//!
//! A single async mutex guards the map and recency list together; eviction
//! and expiry only ever happen while that lock is held, so there is no
//! separate "cleanup" race to reason about.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

mod keys;
pub use keys::{messages_key, quota_key, tools_key};

struct Entry<V> {
    value: V,
    expires_at: Instant,
    // Monotonically increasing use-counter; the lowest value among live
    // entries is the eviction candidate. Cheaper than an intrusive
    // doubly-linked list for the access patterns this cache sees (read-
    // heavy, capacity in the low thousands).
    recency: u64,
}

/// A capacity-bounded, TTL-aware cache keyed by `String`.
///
/// `Get` promotes recency; `Set` evicts the least-recently-used entry when
/// inserting a new key would exceed `capacity`. A TTL of zero or negative
/// is accepted and simply produces an entry that is already expired.
pub struct Cache<V> {
    inner: Mutex<Inner<V>>,
    capacity: usize,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    clock: u64,
}

impl<V: Clone> Cache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity.min(1024)),
                clock: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Returns `(value, hit)`. A miss is either "never set" or "expired".
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let expired = match inner.entries.get(key) {
            Some(e) => now > e.expires_at,
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            return None;
        }
        inner.clock += 1;
        let clock = inner.clock;
        let entry = inner.entries.get_mut(key).expect("checked above");
        entry.recency = clock;
        Some(entry.value.clone())
    }

    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut inner = self.inner.lock().await;
        let expires_at = Instant::now() + ttl;
        inner.clock += 1;
        let clock = inner.clock;
        let is_new = !inner.entries.contains_key(&key);
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                recency: clock,
            },
        );
        if is_new && inner.entries.len() > self.capacity {
            evict_oldest(&mut inner.entries);
        }
    }

    pub async fn delete(&self, key: &str) {
        self.inner.lock().await.entries.remove(key);
    }

    pub async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Scan and drop every entry whose TTL has elapsed. Called by the
    /// background sweeper; exposed for tests that want to assert sweep
    /// behavior without waiting out the real interval.
    pub async fn sweep_expired(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| now <= e.expires_at);
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(removed, remaining = inner.entries.len(), "cache sweep removed expired entries");
        }
    }
}

fn evict_oldest<V>(entries: &mut HashMap<String, Entry<V>>) {
    if let Some(oldest_key) = entries
        .iter()
        .min_by_key(|(_, e)| e.recency)
        .map(|(k, _)| k.clone())
    {
        entries.remove(&oldest_key);
    }
}

/// Spawns the 5-minute background sweeper for `cache` and returns a handle
/// whose [`SweepHandle::stop`] halts it. Dropping the handle without calling
/// `stop` also aborts the task.
pub struct SweepHandle {
    task: tokio::task::JoinHandle<()>,
}

impl SweepHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn spawn_sweeper<V>(cache: std::sync::Arc<Cache<V>>) -> SweepHandle
where
    V: Clone + Send + Sync + 'static,
{
    spawn_sweeper_with_period(cache, Duration::from_secs(5 * 60))
}

pub fn spawn_sweeper_with_period<V>(cache: std::sync::Arc<Cache<V>>, period: Duration) -> SweepHandle
where
    V: Clone + Send + Sync + 'static,
{
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // First tick fires immediately; skip it so we don't sweep an empty
        // cache right at startup.
        interval.tick().await;
        loop {
            interval.tick().await;
            cache.sweep_expired().await;
        }
    });
    SweepHandle { task }
}

/// Quota snapshots must never be mutated through a caller's reference once
/// stored, so both directions of travel go through a clone.
pub struct QuotaCache<V> {
    cache: Cache<V>,
}

impl<V: Clone> QuotaCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Cache::new(capacity),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        // `Cache::get` already clones on the way out; the clone itself is
        // the deep copy as long as `V` does not contain shared interior
        // mutability (accounts store plain data here, never a handle).
        self.cache.get(key).await
    }

    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.cache.set(key, value, ttl).await;
    }

    pub async fn delete(&self, key: &str) {
        self.cache.delete(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_then_get_hits() {
        let cache = Cache::new(4);
        cache.set("a", 1, Duration::from_secs(60)).await;
        assert_eq!(cache.get("a").await, Some(1));
    }

    #[tokio::test]
    async fn miss_on_unknown_key() {
        let cache: Cache<i32> = Cache::new(4);
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn zero_ttl_is_already_expired() {
        let cache = Cache::new(4);
        cache.set("a", 1, Duration::from_secs(0)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get("a").await, None);
    }

    #[tokio::test]
    async fn eviction_respects_capacity() {
        let cache = Cache::new(2);
        cache.set("a", 1, Duration::from_secs(60)).await;
        cache.set("b", 2, Duration::from_secs(60)).await;
        // touch "a" so "b" becomes the eviction candidate
        cache.get("a").await;
        cache.set("c", 3, Duration::from_secs(60)).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.get("a").await, Some(1));
        assert_eq!(cache.get("c").await, Some(3));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = Cache::new(4);
        cache.set("a", 1, Duration::from_secs(60)).await;
        cache.delete("a").await;
        assert_eq!(cache.get("a").await, None);
    }

    #[tokio::test]
    async fn sweep_expired_drops_stale_entries_only() {
        let cache = Cache::new(4);
        cache.set("stale", 1, Duration::from_millis(1)).await;
        cache.set("fresh", 2, Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.sweep_expired().await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("fresh").await, Some(2));
    }

    #[tokio::test]
    async fn quota_cache_roundtrips() {
        let cache: QuotaCache<bool> = QuotaCache::new(4);
        cache.set("quota:v1:abc", true, Duration::from_secs(3600)).await;
        assert_eq!(cache.get("quota:v1:abc").await, Some(true));
    }
}
