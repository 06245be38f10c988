//! In-memory stores owned by a cache task.

use std::collections::BTreeMap;
use std::hash::Hash;

use ahash::AHashMap;

/// Key/value storage behind a cache.
///
/// `put` returns the entries pushed out to make room, so the owner can
/// report them as element events.
pub trait MemoryStore<K, V>: Send {
    /// Returns the value for `key`, marking it as recently used.
    fn get(&mut self, key: &K) -> Option<&V>;

    /// Inserts or replaces a value. Returns evicted entries.
    fn put(&mut self, key: K, value: V) -> Vec<(K, V)>;

    /// Removes a value.
    fn evict(&mut self, key: &K) -> Option<V>;

    /// Returns whether `key` is present without touching recency.
    fn contains(&self, key: &K) -> bool;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Returns true if the store holds nothing.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded store evicting the least recently used entry.
///
/// Recency is a monotonically increasing tick per access; `order` maps ticks
/// back to keys so the oldest entry is the first one in the tree.
#[derive(Debug)]
pub struct LruStore<K, V> {
    capacity: usize,
    tick: u64,
    entries: AHashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
}

impl<K: Clone + Eq + Hash, V> LruStore<K, V> {
    /// Creates a store holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: AHashMap::new(),
            order: BTreeMap::new(),
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

impl<K, V> MemoryStore<K, V> for LruStore<K, V>
where
    K: Clone + Eq + Hash + Send,
    V: Send,
{
    fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.next_tick();
        let (_, used) = self.entries.get_mut(key)?;
        self.order.remove(used);
        *used = tick;
        self.order.insert(tick, key.clone());
        self.entries.get(key).map(|(value, _)| value)
    }

    fn put(&mut self, key: K, value: V) -> Vec<(K, V)> {
        let tick = self.next_tick();
        if let Some((_, used)) = self.entries.insert(key.clone(), (value, tick)) {
            self.order.remove(&used);
        }
        self.order.insert(tick, key);

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            if let Some((value, _)) = self.entries.remove(&oldest) {
                evicted.push((oldest, value));
            }
        }
        evicted
    }

    fn evict(&mut self, key: &K) -> Option<V> {
        let (value, used) = self.entries.remove(key)?;
        self.order.remove(&used);
        Some(value)
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Unbounded store that never evicts on its own.
#[derive(Debug)]
pub struct EternalStore<K, V> {
    entries: AHashMap<K, V>,
}

impl<K: Eq + Hash, V> EternalStore<K, V> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> Default for EternalStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> MemoryStore<K, V> for EternalStore<K, V>
where
    K: Eq + Hash + Send,
    V: Send,
{
    fn get(&mut self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    fn put(&mut self, key: K, value: V) -> Vec<(K, V)> {
        self.entries.insert(key, value);
        Vec::new()
    }

    fn evict(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_evicts_least_recent() {
        let mut store = LruStore::new(2);
        assert!(store.put(1, "a").is_empty());
        assert!(store.put(2, "b").is_empty());
        assert_eq!(store.get(&1), Some(&"a"));

        let evicted = store.put(3, "c");
        assert_eq!(evicted, vec![(2, "b")]);
        assert!(store.contains(&1));
        assert!(store.contains(&3));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_lru_replace_refreshes() {
        let mut store = LruStore::new(2);
        store.put(1, 10);
        store.put(2, 20);
        assert!(store.put(1, 11).is_empty());
        assert_eq!(store.put(3, 30), vec![(2, 20)]);
        assert_eq!(store.get(&1), Some(&11));
    }

    #[test]
    fn test_lru_evict_and_miss() {
        let mut store = LruStore::new(4);
        store.put("k", 1);
        assert_eq!(store.get(&"x"), None);
        assert_eq!(store.evict(&"k"), Some(1));
        assert_eq!(store.evict(&"k"), None);
        assert!(store.is_empty());
        assert_eq!(LruStore::<u8, u8>::new(0).capacity(), 1);
    }

    #[test]
    fn test_eternal_never_evicts() {
        let mut store = EternalStore::new();
        for i in 0..10_000u32 {
            assert!(store.put(i, i * 2).is_empty());
        }
        assert_eq!(store.len(), 10_000);
        assert_eq!(store.get(&9_999), Some(&19_998));
        assert_eq!(store.evict(&0), Some(0));
        assert!(!store.contains(&0));
    }
}
