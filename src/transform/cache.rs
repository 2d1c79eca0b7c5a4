//! Size-bounded LRU container for transformed images.
//!
//! The container tracks the total weight (in bytes) of everything it holds
//! and evicts least-recently-used entries before an insert would push the
//! total past capacity. It knows nothing about HTTP or transforms: keys and
//! values are generic, and values report their own weight through
//! [`Weighted`].
//!
//! # Ownership
//!
//! The container is not internally synchronized. It is owned by the
//! transform manager task, which is the only code that mutates it, so every
//! method call is one atomic step from any observer's point of view.

use std::hash::Hash;
use std::time::Instant;

use bytes::Bytes;
use lru::LruCache;

/// Default cache capacity: 100MB
pub const DEFAULT_CACHE_CAPACITY: usize = 100 * 1024 * 1024;

/// Values stored in a [`SizedLruCache`] report how many bytes they occupy.
pub trait Weighted {
    fn weight(&self) -> usize;
}

impl Weighted for Bytes {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Weighted for Vec<u8> {
    fn weight(&self) -> usize {
        self.len()
    }
}

/// Result of a [`SizedLruCache::put`].
#[derive(Debug, PartialEq, Eq)]
pub enum CachePut<K> {
    /// The value was stored; these keys were evicted to make room, oldest first.
    Stored { evicted: Vec<K> },
    /// The value is larger than the whole capacity and was not stored.
    TooLarge,
}

struct Slot<V> {
    value: V,
    last_access: Instant,
}

/// LRU container with a byte-size capacity.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use pixelpipe::transform::{CachePut, SizedLruCache};
///
/// let mut cache = SizedLruCache::with_capacity(100);
/// cache.put("a", Bytes::from(vec![0u8; 40]));
/// cache.put("b", Bytes::from(vec![0u8; 40]));
///
/// // "a" is the least recently used entry, so it makes room for "c"
/// let outcome = cache.put("c", Bytes::from(vec![0u8; 40]));
/// assert_eq!(outcome, CachePut::Stored { evicted: vec!["a"] });
/// assert_eq!(cache.current_size(), 80);
/// ```
pub struct SizedLruCache<K: Hash + Eq, V: Weighted> {
    entries: LruCache<K, Slot<V>>,
    capacity: usize,
    current_size: usize,
}

impl<K: Hash + Eq, V: Weighted> SizedLruCache<K, V> {
    /// Create a container with the default capacity (100MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create a container holding at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            capacity,
            current_size: 0,
        }
    }

    /// Get a value, marking it as most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = self.entries.get_mut(key)?;
        slot.last_access = Instant::now();
        Some(&slot.value)
    }

    /// Get a value without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.peek(key).map(|slot| &slot.value)
    }

    /// Check for a key without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Store a value.
    ///
    /// A previous value under the same key is released first. Then the least
    /// recently used entries are evicted one at a time until the new value
    /// fits, and finally the value is inserted as most recently used. A value
    /// heavier than the whole capacity is rejected and the container is left
    /// untouched.
    pub fn put(&mut self, key: K, value: V) -> CachePut<K> {
        let weight = value.weight();
        if weight > self.capacity {
            return CachePut::TooLarge;
        }

        if let Some(old) = self.entries.pop(&key) {
            self.current_size -= old.value.weight();
        }

        let mut evicted = Vec::new();
        while self.current_size + weight > self.capacity {
            match self.entries.pop_lru() {
                Some((old_key, old)) => {
                    self.current_size -= old.value.weight();
                    evicted.push(old_key);
                }
                None => break,
            }
        }

        self.entries.put(
            key,
            Slot {
                value,
                last_access: Instant::now(),
            },
        );
        self.current_size += weight;

        CachePut::Stored { evicted }
    }

    /// Remove a value, returning it if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.pop(key)?;
        self.current_size -= slot.value.weight();
        Some(slot.value)
    }

    /// Remove every entry last accessed before `cutoff`.
    ///
    /// Walks from the least recently used end and stops at the first entry
    /// that is young enough; recency order and access-time order coincide.
    /// Returns the number of removed entries.
    pub fn purge_older_than(&mut self, cutoff: Instant) -> usize {
        let mut removed = 0;
        loop {
            let expired = matches!(
                self.entries.peek_lru(),
                Some((_, slot)) if slot.last_access < cutoff
            );
            if !expired {
                break;
            }
            if let Some((_, slot)) = self.entries.pop_lru() {
                self.current_size -= slot.value.weight();
                removed += 1;
            }
        }
        removed
    }

    /// Remove everything. Returns the number of removed entries.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.current_size = 0;
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total weight of all stored values in bytes.
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Maximum total weight in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<K: Hash + Eq, V: Weighted> Default for SizedLruCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
