//! Byte-budgeted LRU entry store.
//!
//! [`CacheStore`] is the authoritative in-memory map from key to entry. It
//! keeps the summed payload size at or under `max_bytes` after every
//! mutation by evicting least-recently-used entries. The store itself is not
//! synchronized; [`CacheManager`](crate::CacheManager) owns it behind a
//! single mutex.

use std::collections::{HashSet, VecDeque};

use lru::LruCache;
use tracing::debug;

use crate::entry::{CacheEntry, CacheKey};

/// How many evicted keys are remembered for miss reporting.
const TOMBSTONE_CAPACITY: usize = 1024;

/// What happened during a [`CacheStore::put`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// Keys evicted to restore the budget, least recently used first. May
    /// include the inserted key itself.
    pub evicted: Vec<CacheKey>,
    /// The inserted entry alone exceeds the budget and was evicted immediately.
    pub too_large: bool,
    /// An older entry with the same key was replaced.
    pub replaced: bool,
}

/// Bounded FIFO set of recently evicted keys.
#[derive(Debug, Default)]
struct Tombstones {
    order: VecDeque<CacheKey>,
    keys: HashSet<CacheKey>,
}

impl Tombstones {
    fn record(&mut self, key: CacheKey) {
        if self.keys.insert(key.clone()) {
            self.order.push_back(key);
            if self.order.len() > TOMBSTONE_CAPACITY {
                if let Some(oldest) = self.order.pop_front() {
                    self.keys.remove(&oldest);
                }
            }
        }
    }

    fn forget(&mut self, key: &CacheKey) {
        if self.keys.remove(key) {
            self.order.retain(|k| k != key);
        }
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.keys.contains(key)
    }

    fn clear(&mut self) {
        self.order.clear();
        self.keys.clear();
    }
}

/// In-memory LRU map of cache entries bounded by total payload bytes.
pub struct CacheStore {
    entries: LruCache<CacheKey, CacheEntry>,
    total_bytes: u64,
    max_bytes: u64,
    evicted: Tombstones,
}

impl CacheStore {
    /// Creates an empty store with the given byte budget.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_bytes: 0,
            max_bytes,
            evicted: Tombstones::default(),
        }
    }

    /// Returns the entry for `key`, marking it most recently used and
    /// recording the access.
    pub fn get(&mut self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get_mut(key).map(|entry| {
            entry.touch();
            &*entry
        })
    }

    /// Returns the entry for `key` without affecting recency or counters.
    pub fn peek(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.peek(key)
    }

    /// Returns `true` if an entry for `key` is present.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    /// Inserts or replaces an entry, then evicts until the budget holds.
    ///
    /// Eviction is unconditional: an entry larger than the whole budget is
    /// evicted right after insertion and reported through
    /// [`PutOutcome::too_large`].
    pub fn put(&mut self, entry: CacheEntry) -> PutOutcome {
        let key = entry.key.clone();
        let size = entry.size_bytes;
        let mut outcome = PutOutcome::default();

        if let Some(old) = self.entries.put(key.clone(), entry) {
            self.total_bytes -= old.size_bytes;
            outcome.replaced = true;
        }
        self.total_bytes += size;
        self.evicted.forget(&key);

        outcome.evicted = self.evict_until_under(self.max_bytes);
        outcome.too_large = outcome.evicted.contains(&key);
        outcome
    }

    /// Removes the entry for `key`.
    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Evicts least-recently-used entries until the total size is at most
    /// `max_bytes`. Returns the evicted keys in eviction order.
    pub fn evict_until_under(&mut self, max_bytes: u64) -> Vec<CacheKey> {
        let mut evicted = Vec::new();
        while self.total_bytes > max_bytes {
            let Some((key, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.total_bytes -= entry.size_bytes;
            debug!(key = %key, size = entry.size_bytes, "evicted cache entry");
            self.evicted.record(key.clone());
            evicted.push(key);
        }
        evicted
    }

    /// Returns `true` if `key` was recently evicted for budget reasons and
    /// has not been stored again since.
    pub fn was_evicted(&self, key: &CacheKey) -> bool {
        self.evicted.contains(key)
    }

    /// Removes every entry and forgets eviction history.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.evicted.clear();
        self.total_bytes = 0;
    }

    /// Iterates over entries from most to least recently used without
    /// promoting them.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.iter().map(|(_, entry)| entry)
    }

    /// Clones every entry, least recently used first, so that re-inserting
    /// the result in order reproduces the same recency order.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.iter().cloned().collect();
        entries.reverse();
        entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the payload sizes of all entries.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// The byte budget.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::DependencySet;
    use crate::hasher::ClosureSnapshot;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::path::Path;
    use vigil_common::ContentHash;

    fn entry(name: &str, size: usize) -> CacheEntry {
        let snapshot = ClosureSnapshot::new(
            ContentHash::from_bytes(name.as_bytes()),
            DependencySet::new(),
            false,
        );
        CacheEntry::new(key(name), snapshot, vec![b'x'; size])
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::new(Path::new(name), "test")
    }

    #[test]
    fn put_then_get() {
        let mut store = CacheStore::new(1024);
        let outcome = store.put(entry("a.ts", 10));
        assert!(outcome.evicted.is_empty());
        assert!(!outcome.too_large);

        let got = store.get(&key("a.ts")).unwrap();
        assert_eq!(got.size_bytes, 10);
        assert_eq!(got.access_count, 1);
        assert_eq!(store.total_bytes(), 10);
    }

    #[test]
    fn peek_does_not_touch() {
        let mut store = CacheStore::new(1024);
        store.put(entry("a.ts", 10));
        assert_eq!(store.peek(&key("a.ts")).unwrap().access_count, 0);
        assert_eq!(store.peek(&key("a.ts")).unwrap().access_count, 0);
    }

    #[test]
    fn two_sixty_byte_entries_in_hundred_byte_budget() {
        let mut store = CacheStore::new(100);
        store.put(entry("first.ts", 60));
        let outcome = store.put(entry("second.ts", 60));

        assert_eq!(outcome.evicted, vec![key("first.ts")]);
        assert_eq!(store.total_bytes(), 60);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&key("second.ts")));
        assert!(store.was_evicted(&key("first.ts")));
    }

    #[test]
    fn least_recently_accessed_is_evicted_first() {
        let mut store = CacheStore::new(30);
        store.put(entry("c.ts", 10));
        store.put(entry("b.ts", 10));
        store.put(entry("a.ts", 10));
        // Access order A, B, C: A is now least recent
        store.get(&key("a.ts"));
        store.get(&key("b.ts"));
        store.get(&key("c.ts"));

        let outcome = store.put(entry("d.ts", 10));
        assert_eq!(outcome.evicted, vec![key("a.ts")]);
        assert!(store.contains(&key("b.ts")));
        assert!(store.contains(&key("c.ts")));
    }

    #[test]
    fn untouched_entries_evict_in_insertion_order() {
        let mut store = CacheStore::new(20);
        store.put(entry("a.ts", 10));
        store.put(entry("b.ts", 10));
        let outcome = store.put(entry("c.ts", 20));
        assert_eq!(outcome.evicted, vec![key("a.ts"), key("b.ts")]);
    }

    #[test]
    fn oversized_put_drains_store_lru_first() {
        let mut store = CacheStore::new(100);
        store.put(entry("small.ts", 10));
        let outcome = store.put(entry("huge.ts", 500));

        assert!(outcome.too_large);
        assert!(!store.contains(&key("huge.ts")));
        // Eviction runs LRU-first, so the small entry went before the huge one
        assert!(outcome.evicted.contains(&key("small.ts")));
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn replace_adjusts_total() {
        let mut store = CacheStore::new(1024);
        store.put(entry("a.ts", 100));
        let outcome = store.put(entry("a.ts", 40));
        assert!(outcome.replaced);
        assert_eq!(store.total_bytes(), 40);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_again_clears_tombstone() {
        let mut store = CacheStore::new(10);
        store.put(entry("a.ts", 10));
        store.put(entry("b.ts", 10));
        assert!(store.was_evicted(&key("a.ts")));
        store.put(entry("a.ts", 10));
        assert!(!store.was_evicted(&key("a.ts")));
        assert!(store.was_evicted(&key("b.ts")));
    }

    #[test]
    fn remove_and_clear() {
        let mut store = CacheStore::new(1024);
        store.put(entry("a.ts", 10));
        store.put(entry("b.ts", 20));
        assert_eq!(store.remove(&key("a.ts")).unwrap().size_bytes, 10);
        assert!(store.remove(&key("a.ts")).is_none());
        assert_eq!(store.total_bytes(), 20);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn snapshot_is_lru_first() {
        let mut store = CacheStore::new(1024);
        store.put(entry("a.ts", 1));
        store.put(entry("b.ts", 1));
        store.put(entry("c.ts", 1));
        store.get(&key("a.ts"));

        let order: Vec<CacheKey> = store.snapshot().into_iter().map(|e| e.key).collect();
        assert_eq!(order, vec![key("b.ts"), key("c.ts"), key("a.ts")]);

        let mut rebuilt = CacheStore::new(1024);
        for e in store.snapshot() {
            rebuilt.put(e);
        }
        let rebuilt_order: Vec<CacheKey> =
            rebuilt.snapshot().into_iter().map(|e| e.key).collect();
        assert_eq!(rebuilt_order, order);
    }

    #[test]
    fn budget_holds_under_random_workload() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut store = CacheStore::new(1_000);
        for _ in 0..2_000 {
            let name = format!("f{}.ts", rng.gen_range(0..50));
            match rng.gen_range(0..10) {
                0 => {
                    store.remove(&key(&name));
                }
                1..=3 => {
                    store.get(&key(&name));
                }
                _ => {
                    store.put(entry(&name, rng.gen_range(0..400)));
                }
            }
            assert!(store.total_bytes() <= 1_000);
            let summed: u64 = store.iter().map(|e| e.size_bytes).sum();
            assert_eq!(summed, store.total_bytes());
        }
    }
}
