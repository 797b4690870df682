//! In-memory TTL cache with least-recently-used eviction.
//!
//! One [`TtlCache`] is created per data category (task pages, responsible
//! lookups, ...) so categories never evict each other. Keys are normalised
//! (trimmed, lowercased) before use, and [`CacheKey::structured`] sorts its
//! components so that the order callers list them in never matters.
//!
//! Entries are visible only while `now < inserted_at + ttl`. Expiry is lazy:
//! an expired entry is dropped the next time it is read, or when the cache is
//! full and room is needed. Eviction picks the entry with the oldest last
//! access, not the oldest insertion.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Builder for normalised cache keys.
pub struct CacheKey;

impl CacheKey {
    /// Normalise a free-form key: trimmed and lowercased.
    pub fn normalize(raw: &str) -> String {
        raw.trim().to_lowercase()
    }

    /// Build a key from a namespace and `(name, value)` components.
    ///
    /// Components are sorted, so `[("page", "1"), ("size", "50")]` and
    /// `[("size", "50"), ("page", "1")]` produce the same key.
    pub fn structured(namespace: &str, parts: &[(&str, &str)]) -> String {
        let mut normalised: Vec<(String, String)> = parts
            .iter()
            .map(|(k, v)| (Self::normalize(k), Self::normalize(v)))
            .collect();
        normalised.sort();

        let mut key = Self::normalize(namespace);
        for (k, v) in normalised {
            key.push('|');
            key.push_str(&k);
            key.push('=');
            key.push_str(&v);
        }
        key
    }
}

/// Counters exposed for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
    /// Position in the recency index.
    access_seq: u64,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.inserted_at + self.ttl
    }
}

struct CacheState<V> {
    entries: HashMap<String, Entry<V>>,
    /// access sequence -> key, oldest first.
    recency: BTreeMap<u64, String>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> CacheState<V> {
    fn touch(&mut self, key: &str) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.access_seq);
            entry.access_seq = seq;
            self.recency.insert(seq, key.to_owned());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.access_seq);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        self.entries.remove(&key);
        true
    }
}

/// Fixed-capacity cache with per-entry TTL.
///
/// All operations take one short lock; values are cloned out so no reference
/// into the cache escapes the lock.
pub struct TtlCache<V> {
    name: String,
    capacity: usize,
    default_ttl: Duration,
    inner: Mutex<CacheState<V>>,
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &str, capacity: usize, default_ttl: Duration) -> Self {
        Self {
            name: name.to_owned(),
            capacity,
            default_ttl,
            inner: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_seq: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up `key`. Returns `Some(value)` on a hit, `None` on a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let key = CacheKey::normalize(key);
        let Ok(mut state) = self.inner.lock() else {
            return None;
        };

        let Some(live) = state.entries.get(&key).map(|e| e.is_live(now)) else {
            state.misses += 1;
            return None;
        };
        if !live {
            state.remove(&key);
            state.misses += 1;
            return None;
        }

        state.hits += 1;
        state.touch(&key);
        state.entries.get(&key).map(|e| e.value.clone())
    }

    /// Insert with the cache's default TTL.
    pub fn insert(&self, key: &str, value: V) {
        self.insert_at(key, value, self.default_ttl, Instant::now());
    }

    pub fn insert_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        self.insert_at(key, value, ttl, Instant::now());
    }

    pub fn insert_at(&self, key: &str, value: V, ttl: Duration, now: Instant) {
        if self.capacity == 0 {
            return;
        }
        let key = CacheKey::normalize(key);
        let Ok(mut state) = self.inner.lock() else {
            return;
        };

        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            let purged = state.purge_expired(now);
            state.evictions += purged as u64;
            if state.entries.len() >= self.capacity && state.evict_lru() {
                state.evictions += 1;
            }
        }

        state.remove(&key);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.recency.insert(seq, key.clone());
        state.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                ttl,
                access_seq: seq,
            },
        );
    }

    /// Remove every entry whose key contains `pattern` (after normalisation).
    ///
    /// An empty pattern or `"*"` clears the cache. Returns how many entries
    /// were removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let pattern = CacheKey::normalize(pattern);
        let Ok(mut state) = self.inner.lock() else {
            return 0;
        };
        if pattern.is_empty() || pattern == "*" {
            let removed = state.entries.len();
            state.entries.clear();
            state.recency.clear();
            return removed;
        }
        let matching: Vec<String> = state
            .entries
            .keys()
            .filter(|k| k.contains(&pattern))
            .cloned()
            .collect();
        for key in &matching {
            state.remove(key);
        }
        matching.len()
    }

    pub fn stats(&self) -> CacheStats {
        match self.inner.lock() {
            Ok(state) => CacheStats {
                hits: state.hits,
                misses: state.misses,
                evictions: state.evictions,
                size: state.entries.len(),
                capacity: self.capacity,
            },
            Err(_) => CacheStats {
                capacity: self.capacity,
                ..CacheStats::default()
            },
        }
    }
}
