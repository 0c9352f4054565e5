//! Chained string-keyed hash map
//!
//! Buckets are owning chains selected by `hash & mask`. Every entry caches
//! the hash of its key, so growing the table relinks entries without
//! touching key bytes. The map owns every key and value: removing an entry,
//! clearing the map or dropping it releases them.
//!
//! Growth is deliberately lazy: the table doubles only once the entry count
//! reaches three times the bucket count.

use crate::hash::hash_str;

/// Bucket count used by [`StrHashMap::new`]
pub const DEFAULT_CAPACITY: usize = 16;

/// Entries allowed per bucket (on average) before the table doubles
pub const GROWTH_FACTOR: usize = 3;

struct Entry<V> {
    hash: u32,
    key: Box<str>,
    value: V,
}

/// String-keyed map with chained buckets
pub struct StrHashMap<V> {
    buckets: Vec<Vec<Entry<V>>>,
    count: usize,
    mask: usize,
    resizes: usize,
}

impl<V> StrHashMap<V> {
    /// Create a map with [`DEFAULT_CAPACITY`] buckets
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a map; the bucket count is rounded up to a power of two
    pub fn with_capacity(capacity: usize) -> Self {
        let size = capacity.max(1).next_power_of_two();
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, Vec::new);

        Self {
            buckets,
            count: 0,
            mask: size - 1,
            resizes: 0,
        }
    }

    #[inline]
    fn bucket_index(&self, hash: u32) -> usize {
        hash as usize & self.mask
    }

    fn position(&self, key: &str, hash: u32) -> Option<(usize, usize)> {
        let bucket = self.bucket_index(hash);
        self.buckets[bucket]
            .iter()
            .position(|e| e.hash == hash && &*e.key == key)
            .map(|slot| (bucket, slot))
    }

    /// Link a new entry at the head of its chain, growing the table first
    /// if it is saturated
    fn link(&mut self, key: &str, hash: u32, value: V) -> &mut V {
        if self.count >= GROWTH_FACTOR * self.buckets.len() {
            self.resize();
        }

        let bucket = self.bucket_index(hash);
        let chain = &mut self.buckets[bucket];
        chain.insert(
            0,
            Entry {
                hash,
                key: key.into(),
                value,
            },
        );
        self.count += 1;

        &mut chain[0].value
    }

    fn resize(&mut self) {
        let new_size = self.buckets.len() * 2;
        let new_mask = new_size - 1;

        let mut buckets: Vec<Vec<Entry<V>>> = Vec::with_capacity(new_size);
        buckets.resize_with(new_size, Vec::new);

        for chain in self.buckets.drain(..) {
            for entry in chain {
                buckets[entry.hash as usize & new_mask].push(entry);
            }
        }

        self.buckets = buckets;
        self.mask = new_mask;
        self.resizes += 1;

        log::trace!("Hash map grown to {} buckets ({} entries)", new_size, self.count);
    }

    /// Insert a value, replacing and returning the previous one for `key`
    pub fn insert(&mut self, key: &str, value: V) -> Option<V> {
        let hash = hash_str(key);
        match self.position(key, hash) {
            Some((bucket, slot)) => {
                Some(std::mem::replace(&mut self.buckets[bucket][slot].value, value))
            }
            None => {
                self.link(key, hash, value);
                None
            }
        }
    }

    /// Get the value for `key`, inserting `make()` on a miss
    pub fn get_or_insert_with(&mut self, key: &str, make: impl FnOnce() -> V) -> &mut V {
        let hash = hash_str(key);
        match self.position(key, hash) {
            Some((bucket, slot)) => &mut self.buckets[bucket][slot].value,
            None => self.link(key, hash, make()),
        }
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&V> {
        let hash = hash_str(key);
        self.position(key, hash)
            .map(|(bucket, slot)| &self.buckets[bucket][slot].value)
    }

    /// Get a mutable value by key
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let hash = hash_str(key);
        match self.position(key, hash) {
            Some((bucket, slot)) => Some(&mut self.buckets[bucket][slot].value),
            None => None,
        }
    }

    /// Check if a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key, hash_str(key)).is_some()
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let hash = hash_str(key);
        let (bucket, slot) = self.position(key, hash)?;
        let entry = self.buckets[bucket].remove(slot);
        self.count -= 1;
        Some(entry.value)
    }

    /// Remove every entry, keeping the current bucket count
    pub fn clear(&mut self) {
        for chain in &mut self.buckets {
            chain.clear();
        }
        self.count = 0;
    }

    /// Iterate over all keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().flatten().map(|e| &*e.key)
    }

    /// Iterate over all values
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.buckets.iter().flatten().map(|e| &e.value)
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.buckets.iter().flatten().map(|e| (&*e.key, &e.value))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current number of buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// How many times the table has doubled
    pub fn resize_count(&self) -> usize {
        self.resizes
    }

    /// Length of the longest bucket chain
    pub fn max_chain(&self) -> usize {
        self.buckets.iter().map(Vec::len).max().unwrap_or(0)
    }
}

impl<V> Default for StrHashMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for StrHashMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrHashMap")
            .field("count", &self.count)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(StrHashMap::<u32>::with_capacity(0).bucket_count(), 1);
        assert_eq!(StrHashMap::<u32>::with_capacity(10).bucket_count(), 16);
        assert_eq!(StrHashMap::<u32>::with_capacity(16).bucket_count(), 16);
        assert_eq!(StrHashMap::<u32>::new().bucket_count(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_new_entries_link_at_chain_head() {
        let mut map = StrHashMap::with_capacity(1);
        map.insert("first", 1);
        map.insert("second", 2);
        map.insert("third", 3);

        assert_eq!(map.bucket_count(), 1);
        assert_eq!(map.max_chain(), 3);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["third", "second", "first"]);

        // Replacing in place keeps the position
        map.insert("second", 20);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["third", "second", "first"]);
    }

    #[test]
    fn test_max_chain_after_growth() {
        let mut map = StrHashMap::with_capacity(1);
        assert_eq!(map.max_chain(), 0);

        for i in 0..4 {
            map.insert(&format!("key{}", i), i);
        }
        assert_eq!(map.bucket_count(), 2);
        assert!(map.max_chain() >= 2);
        assert!(map.max_chain() <= 4);
        assert_eq!(map.values().count(), 4);
    }

    #[test]
    fn test_insert_replaces_existing() {
        let mut map = StrHashMap::new();
        assert_eq!(map.insert("window", 1), None);
        assert_eq!(map.insert("window", 2), Some(1));
        assert_eq!(map.get("window"), Some(&2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_growth_waits_for_three_per_bucket() {
        let mut map = StrHashMap::with_capacity(4);

        // 12 entries fit before the trigger, the 13th insert grows the table
        for i in 0..12 {
            map.insert(&format!("key_{i}"), i);
        }
        assert_eq!(map.bucket_count(), 4);
        assert_eq!(map.resize_count(), 0);

        map.insert("key_12", 12);
        assert_eq!(map.bucket_count(), 8);
        assert_eq!(map.resize_count(), 1);
    }

    #[test]
    fn test_capacity_sixteen_with_49_keys() {
        let mut map = StrHashMap::with_capacity(16);
        for i in 0..49u32 {
            map.insert(&format!("api_{i}"), i);
        }

        assert!(map.resize_count() >= 1);
        assert_eq!(map.len(), 49);
        for i in 0..49u32 {
            assert_eq!(map.get(&format!("api_{i}")), Some(&i));
        }
    }

    #[test]
    fn test_remove_unlinks_entry() {
        let mut map = StrHashMap::new();
        map.insert("a", String::from("alpha"));
        map.insert("b", String::from("beta"));

        assert_eq!(map.remove("a").as_deref(), Some("alpha"));
        assert_eq!(map.remove("a"), None);
        assert!(!map.contains_key("a"));
        assert!(map.contains_key("b"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_get_or_insert_with_only_builds_on_miss() {
        let mut map = StrHashMap::new();
        *map.get_or_insert_with("counter", || 10) += 1;
        *map.get_or_insert_with("counter", || panic!("must not rebuild")) += 1;
        assert_eq!(map.get("counter"), Some(&12));
    }

    #[test]
    fn test_clear_and_iterate() {
        let mut map = StrHashMap::new();
        map.insert("x", 1);
        map.insert("y", 2);

        let mut keys: Vec<_> = map.keys().collect();
        keys.sort_unstable();
        assert_eq!(keys, ["x", "y"]);
        assert_eq!(map.values().sum::<i32>(), 3);

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.iter().count(), 0);
    }
}
