//! Bounded LRU map
//!
//! Wraps the `lru` crate for the in-memory cache tier. Unlike a plain
//! `put`, [`BoundedLru::insert`] reports the entry that was pushed out so
//! callers can log or demote it.

use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache as ExternalLruCache;

/// Entry evicted from a [`BoundedLru`] to make room for a new key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted<K, V> {
    /// Key of the evicted entry
    pub key: K,
    /// Value of the evicted entry
    pub value: V,
}

/// Least-recently-used map with a fixed capacity
///
/// # Examples
///
/// ```
/// use resilink_common::collections::BoundedLru;
///
/// let mut lru = BoundedLru::with_capacity(2);
/// lru.insert("a", 1);
/// lru.insert("b", 2);
/// lru.get(&"a");
///
/// let evicted = lru.insert("c", 3).map(|e| e.key);
/// assert_eq!(evicted, Some("b"));
/// ```
#[derive(Debug)]
pub struct BoundedLru<K, V>
where
    K: Hash + Eq,
{
    inner: ExternalLruCache<K, V>,
}

impl<K: Hash + Eq, V> BoundedLru<K, V> {
    /// Create a map holding at most `capacity` entries
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { inner: ExternalLruCache::new(capacity) }
    }

    /// Create a map from a plain capacity, clamping zero to one
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    /// Insert or replace `key`, returning the entry evicted to make room
    ///
    /// Replacing an existing key never evicts anything.
    pub fn insert(&mut self, key: K, value: V) -> Option<Evicted<K, V>> {
        match self.inner.push(key, value) {
            // `push` hands back the old pair when the key was already present
            Some((old_key, _)) if self.inner.contains(&old_key) => None,
            Some((key, value)) => Some(Evicted { key, value }),
            None => None,
        }
    }

    /// Look up `key` and mark it most recently used
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.get(key)
    }

    /// Look up `key` without touching recency
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.peek(key)
    }

    /// Remove `key`
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.pop(key)
    }

    /// Remove every entry whose key fails `keep`, returning how many went
    pub fn retain_keys<F>(&mut self, mut keep: F) -> usize
    where
        K: Clone,
        F: FnMut(&K, &V) -> bool,
    {
        let doomed: Vec<K> =
            self.inner.iter().filter(|(k, v)| !keep(k, v)).map(|(k, _)| k.clone()).collect();
        for key in &doomed {
            self.inner.pop(key);
        }
        doomed.len()
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Iterate entries, most recently used first
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }
}
