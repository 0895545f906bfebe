//! Bounded LRU cache for retrieval results, keyed by query text and
//! result count.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use tokio::sync::Mutex;

type CacheKey = (String, usize);

/// Async-safe LRU cache. A capacity of zero disables caching.
pub struct QueryCache<V> {
    entries: Option<Mutex<LruCache<CacheKey, V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, query: &str, n: usize) -> Option<V> {
        let entries = self.entries.as_ref()?;
        let found = entries.lock().await.get(&(query.to_string(), n)).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub async fn put(&self, query: &str, n: usize, value: V) {
        if let Some(entries) = &self.entries {
            entries.lock().await.put((query.to_string(), n), value);
        }
    }

    pub async fn len(&self) -> usize {
        match &self.entries {
            Some(entries) => entries.lock().await.len(),
            None => 0,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl<V> std::fmt::Debug for QueryCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("enabled", &self.entries.is_some())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}
