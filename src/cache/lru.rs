//! Bounded least-recently-used cache with entry-count and byte budgets

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

/// A key that belongs to an invalidation group
///
/// Groups back [`LruCache::invalidate_group`], which drops every entry sharing a
/// group without scanning the whole cache.
pub trait CacheKey: Clone + Eq + Hash {
    type Group: Clone + Eq + Hash;

    fn group(&self) -> &Self::Group;
}

/// Size and count budget for one cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl CacheLimits {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries,
            max_bytes,
        }
    }
}

/// A live cache entry
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub size_bytes: usize,
    last_access: AtomicU64,
    /// Tick this entry is filed under in the recency order
    queued: u64,
}

impl<V> CacheEntry<V> {
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

/// Counters for one cache
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    rejections: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time statistics for one cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub rejections: u64,
    pub invalidations: u64,
    pub entries: usize,
    pub bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct LruInner<K: CacheKey, V> {
    entries: HashMap<K, CacheEntry<V>>,
    groups: HashMap<K::Group, HashSet<K>>,
    /// Every entry keyed by its `queued` tick; a filed tick never exceeds the
    /// entry's last access
    order: BTreeMap<u64, K>,
    total_bytes: usize,
}

impl<K: CacheKey, V> LruInner<K, V> {
    fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.queued);
        self.total_bytes -= entry.size_bytes;
        if let Some(members) = self.groups.get_mut(key.group()) {
            members.remove(key);
            if members.is_empty() {
                self.groups.remove(key.group());
            }
        }
        Some(entry)
    }

    /// Remove the least recently used entry
    ///
    /// Hits only bump an entry's atomic tick, so the oldest filed entry may
    /// have been read since. Such an entry is re-filed under its newer tick and
    /// the search continues; each hit costs at most one re-filing.
    fn evict_lru(&mut self) -> Option<CacheEntry<V>> {
        while let Some((queued, key)) = self.order.pop_first() {
            let entry = match self.entries.get_mut(&key) {
                Some(entry) => entry,
                None => continue,
            };
            let last = entry.last_access();
            if last != queued {
                entry.queued = last;
                self.order.insert(last, key);
                continue;
            }
            return self.remove(&key);
        }
        None
    }
}

/// Thread-safe bounded LRU cache
///
/// Hits only take the read lock; recency is tracked by an atomic tick on each
/// entry. `put` takes the write lock and evicts least recently used entries
/// from an ordered tick index until both budgets admit the new entry.
pub struct LruCache<K: CacheKey, V> {
    inner: RwLock<LruInner<K, V>>,
    clock: AtomicU64,
    limits: CacheLimits,
    estimate: fn(&V) -> usize,
    counters: CacheCounters,
}

impl<K: CacheKey, V: Clone> LruCache<K, V> {
    pub fn new(limits: CacheLimits, estimate: fn(&V) -> usize) -> Self {
        Self {
            inner: RwLock::new(LruInner {
                entries: HashMap::new(),
                groups: HashMap::new(),
                order: BTreeMap::new(),
                total_bytes: 0,
            }),
            clock: AtomicU64::new(0),
            limits,
            estimate,
            counters: CacheCounters::default(),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up a value, marking it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let inner = self.inner.read();
        match inner.entries.get(key) {
            Some(entry) => {
                entry.last_access.store(self.tick(), Ordering::Relaxed);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up a value without touching recency or counters
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner
            .read()
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
    }

    /// Whether `key` is cached, without touching recency or counters
    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// Insert a value, evicting least-recently-used entries as needed
    ///
    /// Returns `false` if the value was not admitted because it can never fit.
    pub fn put(&self, key: K, value: V) -> bool {
        let size = (self.estimate)(&value);
        if self.limits.max_entries == 0 || size > self.limits.max_bytes {
            self.counters.rejections.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.remove(&key);

        let limits = self.limits;
        let over_budget = |inner: &LruInner<K, V>| {
            inner.entries.len() + 1 > limits.max_entries
                || inner.total_bytes + size > limits.max_bytes
        };

        let mut evicted = 0u64;
        while over_budget(&*inner) && inner.evict_lru().is_some() {
            evicted += 1;
        }
        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        }

        let tick = self.tick();
        inner
            .groups
            .entry(key.group().clone())
            .or_default()
            .insert(key.clone());
        inner.order.insert(tick, key.clone());
        inner.total_bytes += size;
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                size_bytes: size,
                last_access: AtomicU64::new(tick),
                queued: tick,
            },
        );
        self.counters.insertions.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Drop a single entry
    pub fn invalidate(&self, key: &K) -> bool {
        let removed = self.inner.write().remove(key).is_some();
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drop every entry in `group`, returning how many were removed
    pub fn invalidate_group(&self, group: &K::Group) -> usize {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let members = match inner.groups.remove(group) {
            Some(members) => members,
            None => return 0,
        };
        for key in &members {
            if let Some(entry) = inner.entries.remove(key) {
                inner.order.remove(&entry.queued);
                inner.total_bytes -= entry.size_bytes;
            }
        }
        self.counters
            .invalidations
            .fetch_add(members.len() as u64, Ordering::Relaxed);
        members.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.groups.clear();
        inner.order.clear();
        inner.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.read().total_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let inner = self.inner.read();
            (inner.entries.len(), inner.total_bytes)
        };
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            insertions: self.counters.insertions.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            entries,
            bytes,
        }
    }
}

impl<K: CacheKey, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Key(&'static str, u32);

    impl CacheKey for Key {
        type Group = &'static str;

        fn group(&self) -> &Self::Group {
            &self.0
        }
    }

    fn cache(max_entries: usize, max_bytes: usize) -> LruCache<Key, String> {
        LruCache::new(CacheLimits::new(max_entries, max_bytes), String::len)
    }

    #[test]
    fn test_get_and_put() {
        let c = cache(4, 100);
        assert_eq!(c.get(&Key("a", 1)), None);
        assert!(c.put(Key("a", 1), "one".into()));
        assert_eq!(c.get(&Key("a", 1)), Some("one".to_string()));
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses, stats.insertions), (1, 1, 1));
        assert_eq!(stats.bytes, 3);
    }

    #[test]
    fn test_count_bound_evicts_least_recently_used() {
        let c = cache(2, 100);
        c.put(Key("a", 1), "x".into());
        c.put(Key("a", 2), "y".into());
        // Touch 1 so that 2 becomes the eviction victim.
        c.get(&Key("a", 1));
        c.put(Key("a", 3), "z".into());

        assert!(c.contains(&Key("a", 1)));
        assert!(!c.contains(&Key("a", 2)));
        assert!(c.contains(&Key("a", 3)));
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn test_eviction_order_at_scale() {
        let n = 10_000u32;
        let c = cache(n as usize, usize::MAX);
        for i in 0..n {
            c.put(Key("s", i), "v".into());
        }
        // Touch the even keys, newest first, so they all outrank the odd ones.
        for i in (0..n).rev().filter(|i| i % 2 == 0) {
            assert!(c.get(&Key("s", i)).is_some());
        }
        for i in 0..n / 2 {
            c.put(Key("t", i), "w".into());
        }

        assert_eq!(c.len(), n as usize);
        assert_eq!(c.stats().evictions, u64::from(n / 2));
        assert!((0..n).filter(|i| i % 2 == 1).all(|i| !c.contains(&Key("s", i))));
        assert!((0..n).filter(|i| i % 2 == 0).all(|i| c.contains(&Key("s", i))));

        // Among the touched keys the one read first is now the oldest.
        c.put(Key("t", n), "w".into());
        assert!(!c.contains(&Key("s", n - 2)));
        assert!(c.contains(&Key("s", 0)));
    }

    #[test]
    fn test_byte_bound_evicts_until_fit() {
        let c = cache(10, 10);
        c.put(Key("a", 1), "aaaa".into());
        c.put(Key("a", 2), "bbbb".into());
        c.put(Key("a", 3), "cccccccc".into());

        assert_eq!(c.len(), 1);
        assert_eq!(c.total_bytes(), 8);
        assert_eq!(c.stats().evictions, 2);
    }

    #[test]
    fn test_oversized_entry_is_not_admitted() {
        let c = cache(10, 4);
        c.put(Key("a", 1), "ok".into());
        assert!(!c.put(Key("a", 2), "too large".into()));
        assert!(c.contains(&Key("a", 1)));
        assert_eq!(c.len(), 1);
        assert_eq!(c.stats().rejections, 1);
    }

    #[test]
    fn test_zero_entry_budget_admits_nothing() {
        let c = cache(0, 100);
        assert!(!c.put(Key("a", 1), "x".into()));
        assert!(c.is_empty());
    }

    #[test]
    fn test_replacing_key_updates_bytes() {
        let c = cache(2, 100);
        c.put(Key("a", 1), "short".into());
        c.put(Key("a", 1), "a bit longer".into());
        assert_eq!(c.len(), 1);
        assert_eq!(c.total_bytes(), 12);
        assert_eq!(c.stats().evictions, 0);
    }

    #[test]
    fn test_invalidate_group() {
        let c = cache(10, 100);
        c.put(Key("a", 1), "1".into());
        c.put(Key("a", 2), "2".into());
        c.put(Key("b", 1), "3".into());

        assert_eq!(c.invalidate_group(&"a"), 2);
        assert_eq!(c.invalidate_group(&"a"), 0);
        assert_eq!(c.len(), 1);
        assert_eq!(c.total_bytes(), 1);
        assert!(c.contains(&Key("b", 1)));
    }

    #[test]
    fn test_eviction_keeps_groups_consistent() {
        let c = cache(1, 100);
        c.put(Key("a", 1), "1".into());
        c.put(Key("b", 1), "2".into());
        assert_eq!(c.invalidate_group(&"a"), 0);
        assert_eq!(c.invalidate_group(&"b"), 1);
        assert!(c.is_empty());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let c = cache(10, 100);
        c.put(Key("a", 1), "1".into());
        c.put(Key("a", 2), "2".into());
        assert!(c.invalidate(&Key("a", 1)));
        assert!(!c.invalidate(&Key("a", 1)));
        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.total_bytes(), 0);
        assert_eq!(c.invalidate_group(&"a"), 0);
    }

    #[test]
    fn test_peek_is_invisible_to_stats() {
        let c = cache(2, 100);
        c.put(Key("a", 1), "1".into());
        assert_eq!(c.peek(&Key("a", 1)), Some("1".to_string()));
        assert_eq!(c.peek(&Key("a", 2)), None);
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }

    #[test]
    fn test_hit_rate() {
        let c = cache(2, 100);
        c.put(Key("a", 1), "1".into());
        c.get(&Key("a", 1));
        c.get(&Key("a", 9));
        assert!((c.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
