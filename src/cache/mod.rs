// src/cache/mod.rs

//! TTL cache layer shielding the remote API from redundant calls.
//!
//! Everything here is a performance optimization: the SQLite store and the
//! quota ledger remain the source of truth. A failing cache backend is
//! logged and treated as a miss, never as an error for the caller.

pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::error::Result;
use crate::models::{Video, VideoDetails};

// Re-export for convenience
pub use memory::MemoryCache;

/// Search snapshots stay fresh for two hours.
const SEARCH_TTL_HOURS: i64 = 2;

/// Detail batches change slowly; keep them for a day.
const DETAIL_TTL_HOURS: i64 = 24;

/// Skip markers suppress unproductive queries for six hours.
const SKIP_TTL_HOURS: i64 = 6;

/// Key-value cache backend with TTL semantics.
///
/// Values are opaque strings (the service layer stores JSON). `delete_pattern`
/// accepts a `prefix:*` glob; `flush` drops everything.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    fn delete_pattern(&self, pattern: &str) -> Result<u64>;
    fn flush(&self) -> Result<()>;
}

/// Cached search snapshot for one query.
#[derive(Debug, Serialize, Deserialize)]
struct SearchEntry {
    query: String,
    items: Vec<Video>,
    cached_at: DateTime<Utc>,
}

/// Cached detail batch for one sorted id set.
#[derive(Debug, Serialize, Deserialize)]
struct DetailEntry {
    video_ids: Vec<String>,
    details: Vec<VideoDetails>,
    cached_at: DateTime<Utc>,
}

/// Skip marker recording the last attempt for a query.
#[derive(Debug, Serialize, Deserialize)]
struct SkipMarker {
    query: String,
    last_attempt: DateTime<Utc>,
    new_items: u64,
}

/// Cache-side mirror of one credential's daily quota usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub calls_today: u64,
    pub exhausted: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

/// High-level cache service for search results, detail batches, skip
/// markers, and quota mirrors.
pub struct VideoCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
}

impl VideoCache {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// Derive a stable cache key from a namespace, a query, and extra
    /// parameters. Parameters are sorted first so that identical logical
    /// requests always map to the same key.
    fn cache_key(prefix: &str, query: &str, extra: &[(&str, &str)]) -> String {
        let mut params: Vec<(&str, &str)> = extra.to_vec();
        params.sort();

        let mut material = query.to_string();
        for (name, value) in params {
            material.push(':');
            material.push_str(name);
            material.push('=');
            material.push_str(value);
        }

        let digest = Sha256::digest(material.as_bytes());
        format!("{}:{}", prefix, &hex::encode(digest)[..16])
    }

    /// Store the normalized search snapshot for a query (2h TTL).
    pub fn cache_search_results(&self, query: &str, items: &[Video]) {
        let entry = SearchEntry {
            query: query.to_string(),
            items: items.to_vec(),
            cached_at: self.clock.now(),
        };
        self.set_json(
            &Self::cache_key("search", query, &[]),
            &entry,
            Duration::hours(SEARCH_TTL_HOURS),
        );
    }

    /// Fetch the cached search snapshot, if present and still fresh.
    ///
    /// Freshness is re-checked against the recorded `cached_at` at read
    /// time, so a stale TTL config or clock drift cannot resurrect old data.
    pub fn get_cached_search_results(&self, query: &str) -> Option<Vec<Video>> {
        let entry: SearchEntry = self.get_json(&Self::cache_key("search", query, &[]))?;
        if self.clock.now() - entry.cached_at < Duration::hours(SEARCH_TTL_HOURS) {
            log::debug!("Cache hit for search query: {}", query);
            return Some(entry.items);
        }
        None
    }

    /// Store a detail batch keyed by its sorted id set (24h TTL).
    pub fn cache_video_details(&self, video_ids: &[String], details: &[VideoDetails]) {
        if video_ids.is_empty() {
            return;
        }
        let entry = DetailEntry {
            video_ids: video_ids.to_vec(),
            details: details.to_vec(),
            cached_at: self.clock.now(),
        };
        self.set_json(
            &Self::detail_key(video_ids),
            &entry,
            Duration::hours(DETAIL_TTL_HOURS),
        );
    }

    /// Fetch a cached detail batch for the given id set, in any order.
    pub fn get_cached_video_details(&self, video_ids: &[String]) -> Option<Vec<VideoDetails>> {
        if video_ids.is_empty() {
            return None;
        }
        let entry: DetailEntry = self.get_json(&Self::detail_key(video_ids))?;
        if self.clock.now() - entry.cached_at < Duration::hours(DETAIL_TTL_HOURS) {
            log::debug!("Cache hit for {} video details", video_ids.len());
            return Some(entry.details);
        }
        None
    }

    /// True only if a skip marker exists, is younger than `threshold_hours`,
    /// and the recorded attempt found zero new items.
    pub fn should_skip_query(&self, query: &str, threshold_hours: i64) -> bool {
        let Some(marker) = self.get_json::<SkipMarker>(&Self::skip_key(query)) else {
            return false;
        };

        let age = self.clock.now() - marker.last_attempt;
        if age < Duration::hours(threshold_hours) && marker.new_items == 0 {
            log::debug!(
                "Skipping query '{}': no new items within the last {}h",
                query,
                threshold_hours
            );
            return true;
        }
        false
    }

    /// Record the outcome of an attempt for a query (6h TTL, overwrites).
    pub fn mark_query_processed(&self, query: &str, new_items: u64) {
        let marker = SkipMarker {
            query: query.to_string(),
            last_attempt: self.clock.now(),
            new_items,
        };
        self.set_json(
            &Self::skip_key(query),
            &marker,
            Duration::hours(SKIP_TTL_HOURS),
        );
    }

    /// Read the quota mirror for a credential index (today's UTC bucket).
    ///
    /// Returns a zeroed snapshot when the bucket is missing or the backend
    /// fails; the ledger stays authoritative either way.
    pub fn quota_usage(&self, key_index: usize) -> QuotaSnapshot {
        self.get_json(&self.quota_key(key_index)).unwrap_or_default()
    }

    /// Add to the quota mirror for a credential index. The bucket expires
    /// at UTC midnight, so it resets naturally at the day boundary.
    pub fn update_quota_usage(&self, key_index: usize, calls_made: u64, exhausted: bool) {
        let now = self.clock.now();
        let current = self.quota_usage(key_index);
        let snapshot = QuotaSnapshot {
            calls_today: current.calls_today + calls_made,
            exhausted,
            last_updated: Some(now),
        };
        self.set_json(
            &self.quota_key(key_index),
            &snapshot,
            seconds_until_midnight(now),
        );
    }

    /// Drop cache entries matching a `prefix:*` pattern, or everything.
    pub fn clear(&self, pattern: Option<&str>) {
        let result = match pattern {
            Some(p) => self.backend.delete_pattern(p).map(|n| {
                log::info!("Cleared {} cache entries matching pattern: {}", n, p);
            }),
            None => self.backend.flush().map(|_| {
                log::info!("Cleared all cache entries");
            }),
        };
        if let Err(e) = result {
            log::error!("Error clearing cache: {}", e);
        }
    }

    fn detail_key(video_ids: &[String]) -> String {
        let mut sorted: Vec<&str> = video_ids.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        Self::cache_key("videos", &sorted.join(","), &[])
    }

    fn skip_key(query: &str) -> String {
        format!("skip:{}", query)
    }

    fn quota_key(&self, key_index: usize) -> String {
        format!("quota:{}:{}", key_index, self.clock.now().date_naive())
    }

    /// Read and deserialize a JSON value; backend and decode errors are
    /// logged and collapse to a miss.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                log::error!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!("Cache entry {} is not valid JSON: {}", key, e);
                None
            }
        }
    }

    /// Serialize and store a JSON value; failures are logged and dropped.
    fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("Failed to serialize cache entry {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.backend.set(key, &raw, ttl) {
            log::error!("Cache write failed for {}: {}", key, e);
        }
    }
}

/// TTL that lands exactly on the next UTC midnight.
fn seconds_until_midnight(now: DateTime<Utc>) -> Duration {
    let next_midnight = (now.date_naive() + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc();
    next_midnight - now
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn sample_video(id: &str) -> Video {
        Video {
            video_id: id.to_string(),
            title: format!("Video {}", id),
            description: String::new(),
            published_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            thumbnail_default: String::new(),
            thumbnail_medium: String::new(),
            thumbnail_high: String::new(),
            channel_id: "chan".to_string(),
            channel_title: "Channel".to_string(),
            duration: String::new(),
            view_count: None,
        }
    }

    fn cache_at(start: DateTime<Utc>) -> (VideoCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let backend = Arc::new(MemoryCache::new(clock.clone()));
        (VideoCache::new(backend, clock.clone()), clock)
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let a = VideoCache::cache_key("search", "rust", &[("a", "1"), ("b", "2")]);
        let b = VideoCache::cache_key("search", "rust", &[("b", "2"), ("a", "1")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_differs_per_query() {
        let a = VideoCache::cache_key("search", "rust", &[]);
        let b = VideoCache::cache_key("search", "go", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_search_round_trip_within_ttl() {
        let (cache, clock) = cache_at(start());
        let items = vec![sample_video("a"), sample_video("b")];

        cache.cache_search_results("rust", &items);
        clock.advance(Duration::minutes(30));
        assert_eq!(cache.get_cached_search_results("rust"), Some(items));
    }

    #[test]
    fn test_search_expires_after_ttl() {
        let (cache, clock) = cache_at(start());
        cache.cache_search_results("rust", &[sample_video("a")]);

        clock.advance(Duration::hours(2));
        assert_eq!(cache.get_cached_search_results("rust"), None);
    }

    #[test]
    fn test_detail_lookup_ignores_id_order() {
        let (cache, _) = cache_at(start());
        let ids = vec!["b".to_string(), "a".to_string()];
        let details = vec![VideoDetails {
            video_id: "a".to_string(),
            duration: "PT1M".to_string(),
            view_count: Some(1),
        }];

        cache.cache_video_details(&ids, &details);
        let reversed = vec!["a".to_string(), "b".to_string()];
        assert_eq!(cache.get_cached_video_details(&reversed), Some(details));
    }

    #[test]
    fn test_should_skip_requires_fresh_zero_count() {
        let (cache, clock) = cache_at(start());

        // No marker at all.
        assert!(!cache.should_skip_query("rust", 6));

        // Fresh marker with zero new items.
        cache.mark_query_processed("rust", 0);
        clock.advance(Duration::hours(1));
        assert!(cache.should_skip_query("rust", 6));

        // Fresh marker that found new items never skips.
        cache.mark_query_processed("go", 1);
        assert!(!cache.should_skip_query("go", 6));
    }

    #[test]
    fn test_should_skip_age_boundary_is_exclusive() {
        let (cache, clock) = cache_at(start());
        cache.mark_query_processed("rust", 0);

        clock.advance(Duration::hours(6));
        assert!(!cache.should_skip_query("rust", 6));
    }

    #[test]
    fn test_quota_mirror_accumulates_and_resets_at_midnight() {
        let (cache, clock) = cache_at(start());

        cache.update_quota_usage(0, 100, false);
        cache.update_quota_usage(0, 1, false);
        let snapshot = cache.quota_usage(0);
        assert_eq!(snapshot.calls_today, 101);
        assert!(!snapshot.exhausted);

        // Next day reads an empty bucket.
        clock.advance(Duration::days(1));
        assert_eq!(cache.quota_usage(0).calls_today, 0);
    }

    #[test]
    fn test_seconds_until_midnight() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap();
        assert_eq!(seconds_until_midnight(now), Duration::hours(1));
    }
}
