//! Process-wide translation cache
//!
//! Keyed by the pre-translation SQL text. Bounded LRU with a TTL so schema
//! or configuration drift cannot pin stale translations forever. Shared by
//! every session; the critical section is a map lookup, nothing more.

use crate::translate::Translation;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default entry cap.
pub const DEFAULT_CACHE_ENTRIES: usize = 1000;

/// Default entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

struct Entry {
    translation: Arc<Translation>,
    created: Instant,
}

/// Shared LRU+TTL cache of finished translations.
pub struct TranslationCache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl TranslationCache {
    /// Cache with the default capacity and TTL.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CACHE_ENTRIES, DEFAULT_CACHE_TTL)
    }

    /// Cache with explicit limits.
    pub fn with_limits(entries: usize, ttl: Duration) -> Self {
        let entries = NonZeroUsize::new(entries.max(1)).expect("max(1) is non-zero");
        Self {
            inner: Mutex::new(LruCache::new(entries)),
            ttl,
        }
    }

    /// Fetch a live entry, refreshing its LRU position.
    pub fn get(&self, sql: &str) -> Option<Arc<Translation>> {
        let mut cache = self.inner.lock().expect("cache lock");
        let expired = match cache.get(sql) {
            Some(entry) if entry.created.elapsed() <= self.ttl => {
                return Some(Arc::clone(&entry.translation));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(sql);
        }
        None
    }

    /// Insert a finished translation.
    pub fn put(&self, sql: String, translation: Arc<Translation>) {
        let mut cache = self.inner.lock().expect("cache lock");
        cache.put(
            sql,
            Entry {
                translation,
                created: Instant::now(),
            },
        );
    }

    /// Entries currently cached (tests and stats).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new()
    }
}
