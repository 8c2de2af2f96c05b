// src/cache/memory.rs

//! In-process cache backend.
//!
//! A mutex-guarded map with per-entry expiry timestamps. Expired entries
//! are dropped lazily on read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::error::{AppError, Result};

use super::CacheBackend;

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-memory implementation of [`CacheBackend`].
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|e| AppError::cache(format!("cache lock poisoned: {}", e)))
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > self.clock.now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: self.clock.now() + ttl,
        };
        self.lock()?.insert(key.to_string(), entry);
        Ok(())
    }

    fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut entries = self.lock()?;
        let before = entries.len();
        match pattern.strip_suffix('*') {
            Some(prefix) => entries.retain(|key, _| !key.starts_with(prefix)),
            None => {
                entries.remove(pattern);
            }
        }
        Ok((before - entries.len()) as u64)
    }

    fn flush(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn backend() -> (MemoryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        (MemoryCache::new(clock.clone()), clock)
    }

    #[test]
    fn test_get_set_round_trip() {
        let (cache, _) = backend();
        cache.set("k", "v", Duration::minutes(5)).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let (cache, clock) = backend();
        cache.set("k", "v", Duration::minutes(5)).unwrap();

        clock.advance(Duration::minutes(5));
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn test_delete_pattern_removes_prefix_matches() {
        let (cache, _) = backend();
        cache.set("quota:0:2025-06-01", "a", Duration::hours(1)).unwrap();
        cache.set("quota:1:2025-06-01", "b", Duration::hours(1)).unwrap();
        cache.set("search:abcd", "c", Duration::hours(1)).unwrap();

        let removed = cache.delete_pattern("quota:*").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.get("search:abcd").unwrap(), Some("c".to_string()));
    }

    #[test]
    fn test_flush_clears_everything() {
        let (cache, _) = backend();
        cache.set("a", "1", Duration::hours(1)).unwrap();
        cache.set("b", "2", Duration::hours(1)).unwrap();

        cache.flush().unwrap();
        assert_eq!(cache.get("a").unwrap(), None);
        assert_eq!(cache.get("b").unwrap(), None);
    }
}
