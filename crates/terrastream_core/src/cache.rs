//! # Recency Cache
//!
//! Bounded key/value store with least-recently-used eviction.
//!
//! The cache itself is unbounded; callers decide when to shrink it with
//! [`RecencyCache::prune`] (usually from a periodic pruning pass), so a burst of
//! inserts inside one frame never evicts data that frame still needs.
//!
//! All mutating operations are O(1) amortized. [`RecencyCache::prune_if`] is
//! linear in the number of entries it has to inspect.

use std::hash::Hash;

use lru::LruCache;

/// LRU-ordered cache with explicit pruning.
pub struct RecencyCache<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
}

impl<K: Hash + Eq, V> RecencyCache<K, V> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
        }
    }

    /// Looks up a value without changing its recency.
    #[inline]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.peek(key)
    }

    /// Mutable lookup without changing recency.
    #[inline]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.peek_mut(key)
    }

    /// Returns true if `key` is cached.
    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Marks `key` as most recently used. Unknown keys are ignored.
    #[inline]
    pub fn touch(&mut self, key: &K) {
        self.entries.promote(key);
    }

    /// Inserts or overwrites; the entry becomes most recent.
    /// Returns the previous value.
    #[inline]
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        self.entries.put(key, value)
    }

    /// Removes an entry.
    #[inline]
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key)
    }

    /// Evicts least recently used entries until at most `max` remain.
    pub fn prune(&mut self, max: usize) {
        self.prune_with(max, |_, _| {});
    }

    /// Like [`RecencyCache::prune`], calling `on_evict` once per evicted entry,
    /// oldest first.
    pub fn prune_with<F>(&mut self, max: usize, mut on_evict: F)
    where
        F: FnMut(K, V),
    {
        while self.entries.len() > max {
            match self.entries.pop_lru() {
                Some((key, value)) => on_evict(key, value),
                None => break,
            }
        }
    }

    /// Evicts only entries matching `pred`, oldest first, until at most `max`
    /// remain or no matching entry is left. Returns the number evicted.
    pub fn prune_if<P>(&mut self, max: usize, mut pred: P) -> usize
    where
        K: Clone,
        P: FnMut(&K, &V) -> bool,
    {
        let excess = self.entries.len().saturating_sub(max);
        if excess == 0 {
            return 0;
        }
        let victims: Vec<K> = self
            .entries
            .iter()
            .rev()
            .filter(|(k, v)| pred(*k, *v))
            .take(excess)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &victims {
            self.entries.pop(key);
        }
        victims.len()
    }

    /// Visits every entry, most recent first.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for (k, v) in &self.entries {
            f(k, v);
        }
    }

    /// Iterator over entries, most recent first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: Hash + Eq, V> Default for RecencyCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
