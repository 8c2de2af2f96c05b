// src/services/ingest.rs

//! Fetch cycle orchestration.
//!
//! One `fetch` call runs a full cycle for a query: cache lookups, quota
//! checks, the remote search and detail calls with credential failover,
//! the transactional upsert, and the cache write-back.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;

use crate::cache::VideoCache;
use crate::clock::Clock;
use crate::error::{AppError, Result};
use crate::models::{FetchOutcome, VideoDetails};
use crate::storage::{QueryStateStore, VideoStore};

use super::keys::KeyPool;
use super::youtube::{VideoApi, DETAIL_QUOTA_COST_PER_ID, SEARCH_QUOTA_COST};

/// Skip markers younger than this suppress a repeat fetch.
pub const SKIP_THRESHOLD_HOURS: i64 = 6;

/// Orchestrates one ingestion cycle against the remote API.
///
/// Owns no persistent state across calls; all shared state lives in the
/// injected store, cache, and key pool.
pub struct IngestClient {
    api: Arc<dyn VideoApi>,
    keys: Arc<KeyPool>,
    cache: Arc<VideoCache>,
    videos: Arc<VideoStore>,
    query_state: QueryStateStore,
    clock: Arc<dyn Clock>,
    window_days: i64,
}

impl IngestClient {
    pub fn new(
        api: Arc<dyn VideoApi>,
        keys: Arc<KeyPool>,
        cache: Arc<VideoCache>,
        videos: Arc<VideoStore>,
        query_state: QueryStateStore,
        clock: Arc<dyn Clock>,
        window_days: i64,
    ) -> Self {
        Self {
            api,
            keys,
            cache,
            videos,
            query_state,
            clock,
            window_days,
        }
    }

    /// Run one fetch cycle for a query.
    ///
    /// First pages may be served from the skip marker or the search cache
    /// without touching quota. Quota-exceeded responses trigger failover
    /// to the next credential, retrying the whole cycle at most once per
    /// remaining key; when the pool runs dry the call fails with
    /// [`AppError::KeysExhausted`].
    pub async fn fetch(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<FetchOutcome> {
        if page_token.is_none() {
            if self.cache.should_skip_query(query, SKIP_THRESHOLD_HOURS) {
                return Ok(FetchOutcome::skipped());
            }
            if let Some(items) = self.cache.get_cached_search_results(query) {
                log::info!("Serving cached search results for query: {}", query);
                return Ok(FetchOutcome::from_cache(items));
            }
        }

        // Explicit failover loop, bounded by the pool size.
        let mut attempts_left = self.keys.len();
        loop {
            let key_index = self.active_key_index()?;
            match self.fetch_with_key(key_index, query, max_results, page_token).await {
                Err(AppError::QuotaExceeded) => {
                    log::warn!("Quota exhausted for API key {}", key_index);
                    self.keys.mark_current_exhausted()?;
                    self.cache.update_quota_usage(key_index, 0, true);

                    if attempts_left <= 1 || !self.keys.switch_to_next() {
                        return Err(AppError::KeysExhausted);
                    }
                    attempts_left -= 1;
                    log::info!("Retrying query '{}' with the next API key", query);
                }
                other => return other,
            }
        }
    }

    /// Pick the active credential, skipping keys whose quota mirror is
    /// already marked exhausted for today.
    fn active_key_index(&self) -> Result<usize> {
        loop {
            let Some((index, _)) = self.keys.current_key() else {
                return Err(AppError::KeysExhausted);
            };
            if !self.cache.quota_usage(index).exhausted {
                return Ok(index);
            }
            log::warn!("API key {} already marked exhausted in cache", index);
            if !self.keys.switch_to_next() {
                return Err(AppError::KeysExhausted);
            }
        }
    }

    /// One complete remote cycle with the given credential.
    async fn fetch_with_key(
        &self,
        key_index: usize,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<FetchOutcome> {
        let (_, api_key) = self.keys.current_key().ok_or(AppError::KeysExhausted)?;
        let now = self.clock.now();
        let published_after = now - Duration::days(self.window_days);

        let page = self
            .api
            .search(&api_key, query, published_after, max_results.min(50), page_token)
            .await?;
        self.charge(key_index, SEARCH_QUOTA_COST)?;

        let mut items = page.items;
        let video_ids: Vec<String> = items.iter().map(|v| v.video_id.clone()).collect();

        if !video_ids.is_empty() {
            let details = match self.cache.get_cached_video_details(&video_ids) {
                Some(details) => details,
                None => {
                    let details = self.api.video_details(&api_key, &video_ids).await?;
                    self.charge(key_index, video_ids.len() as u64 * DETAIL_QUOTA_COST_PER_ID)?;
                    self.cache.cache_video_details(&video_ids, &details);
                    details
                }
            };

            let by_id: HashMap<&str, &VideoDetails> =
                details.iter().map(|d| (d.video_id.as_str(), d)).collect();
            for item in &mut items {
                if let Some(detail) = by_id.get(item.video_id.as_str()) {
                    item.apply_details(detail);
                }
            }
        }

        let stored_count = self.videos.upsert_all(&items, now)?;
        self.query_state
            .upsert(query, items.len() as u64, page.next_page_token.as_deref(), now)?;
        self.cache.cache_search_results(query, &items);
        if page_token.is_none() {
            self.cache.mark_query_processed(query, stored_count);
        }

        log::info!(
            "Fetched {} videos, stored {} new for query: {}",
            items.len(),
            stored_count,
            query
        );

        Ok(FetchOutcome {
            items,
            next_page_token: page.next_page_token,
            total_results: page.total_results,
            stored_count,
            cached: false,
            skipped: false,
        })
    }

    /// Charge quota to the ledger and mirror the update into the cache.
    fn charge(&self, key_index: usize, cost: u64) -> Result<()> {
        if let Some(usage) = self.keys.track_usage(cost)? {
            self.cache.update_quota_usage(key_index, cost, usage.exhausted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::models::Video;
    use crate::services::youtube::SearchPage;
    use crate::storage::{Database, KeyUsageStore};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex;

    /// Scripted fake for the remote API.
    struct FakeApi {
        /// Per-key behavior: Err(QuotaExceeded) or a page of items.
        search_results: Mutex<HashMap<String, Vec<ScriptedCall>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    enum ScriptedCall {
        QuotaExceeded,
        Page(Vec<Video>),
    }

    impl FakeApi {
        fn new() -> Self {
            Self {
                search_results: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn script(&self, api_key: &str, call: ScriptedCall) {
            self.search_results
                .lock()
                .unwrap()
                .entry(api_key.to_string())
                .or_default()
                .push(call);
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VideoApi for FakeApi {
        async fn search(
            &self,
            api_key: &str,
            query: &str,
            _published_after: DateTime<Utc>,
            _max_results: u32,
            _page_token: Option<&str>,
        ) -> Result<SearchPage> {
            self.calls
                .lock()
                .unwrap()
                .push((api_key.to_string(), query.to_string()));

            let mut scripts = self.search_results.lock().unwrap();
            let queue = scripts.entry(api_key.to_string()).or_default();
            if queue.is_empty() {
                return Ok(SearchPage::default());
            }
            match queue.remove(0) {
                ScriptedCall::QuotaExceeded => Err(AppError::QuotaExceeded),
                ScriptedCall::Page(items) => Ok(SearchPage {
                    total_results: items.len() as u64,
                    items,
                    next_page_token: None,
                }),
            }
        }

        async fn video_details(
            &self,
            _api_key: &str,
            video_ids: &[String],
        ) -> Result<Vec<VideoDetails>> {
            Ok(video_ids
                .iter()
                .map(|id| VideoDetails {
                    video_id: id.clone(),
                    duration: "PT2M".to_string(),
                    view_count: Some(7),
                })
                .collect())
        }
    }

    struct Harness {
        api: Arc<FakeApi>,
        client: IngestClient,
        cache: Arc<VideoCache>,
        keys: Arc<KeyPool>,
        videos: Arc<VideoStore>,
    }

    fn harness(api_keys: &[&str]) -> Harness {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        ));
        let db = Arc::new(Database::in_memory().unwrap());
        let cache = Arc::new(VideoCache::new(
            Arc::new(MemoryCache::new(clock.clone())),
            clock.clone(),
        ));
        let keys = Arc::new(KeyPool::new(
            api_keys.iter().map(|k| k.to_string()).collect(),
            KeyUsageStore::new(db.clone()),
            clock.clone(),
        ));
        let videos = Arc::new(VideoStore::new(db.clone()));
        let api = Arc::new(FakeApi::new());
        let client = IngestClient::new(
            api.clone(),
            keys.clone(),
            cache.clone(),
            videos.clone(),
            QueryStateStore::new(db),
            clock,
            7,
        );
        Harness {
            api,
            client,
            cache,
            keys,
            videos,
        }
    }

    fn video(id: &str) -> Video {
        Video {
            video_id: id.to_string(),
            title: format!("Video {}", id),
            description: String::new(),
            published_at: Utc.with_ymd_and_hms(2025, 5, 30, 0, 0, 0).unwrap(),
            thumbnail_default: String::new(),
            thumbnail_medium: String::new(),
            thumbnail_high: String::new(),
            channel_id: "chan".to_string(),
            channel_title: "Channel".to_string(),
            duration: String::new(),
            view_count: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_stores_and_merges_details() {
        let h = harness(&["key-1"]);
        h.api.script("key-1", ScriptedCall::Page(vec![video("a"), video("b")]));

        let outcome = h.client.fetch("rust", 50, None).await.unwrap();
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.stored_count, 2);
        assert!(!outcome.cached);
        assert_eq!(outcome.items[0].duration, "PT2M");
        assert_eq!(outcome.items[0].view_count, Some(7));

        // Persisted with merged detail fields.
        let stored = h.videos.get("a").unwrap().unwrap();
        assert_eq!(stored.video.duration, "PT2M");

        // Quota: 100 for the search plus 1 per id.
        let usage = h.keys.current_usage().unwrap().unwrap();
        assert_eq!(usage.quota_used, 102);
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let h = harness(&["key-1"]);
        h.api.script("key-1", ScriptedCall::Page(vec![video("a")]));

        h.client.fetch("rust", 50, None).await.unwrap();
        let outcome = h.client.fetch("rust", 50, None).await.unwrap();

        assert!(outcome.cached);
        assert!(!outcome.skipped);
        assert_eq!(outcome.items.len(), 1);
        // Only the first fetch hit the remote API.
        assert_eq!(h.api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_marker_short_circuits_unproductive_query() {
        let h = harness(&["key-1"]);
        // A prior attempt found nothing new.
        h.cache.mark_query_processed("dead-end", 0);

        let outcome = h.client.fetch("dead-end", 50, None).await.unwrap();
        assert!(outcome.skipped);
        assert!(outcome.items.is_empty());
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failover_retries_with_next_key() {
        let h = harness(&["key-1", "key-2"]);
        h.api.script("key-1", ScriptedCall::QuotaExceeded);
        h.api.script("key-2", ScriptedCall::Page(vec![video("a")]));

        let outcome = h.client.fetch("rust", 50, None).await.unwrap();
        assert_eq!(outcome.stored_count, 1);

        // Both keys were tried, in order, for the same query.
        assert_eq!(
            h.api.calls(),
            vec![
                ("key-1".to_string(), "rust".to_string()),
                ("key-2".to_string(), "rust".to_string()),
            ]
        );

        // The retried call charged usage only to key 2.
        let usage = h.keys.current_usage().unwrap().unwrap();
        assert_eq!(usage.quota_used, 101);
    }

    #[tokio::test]
    async fn test_all_keys_exhausted_fails_with_condition() {
        let h = harness(&["key-1", "key-2"]);
        h.api.script("key-1", ScriptedCall::QuotaExceeded);
        h.api.script("key-2", ScriptedCall::QuotaExceeded);

        let err = h.client.fetch("rust", 50, None).await.unwrap_err();
        assert!(matches!(err, AppError::KeysExhausted));
    }

    #[tokio::test]
    async fn test_empty_pool_fails_fast() {
        let h = harness(&[]);
        let err = h.client.fetch("rust", 50, None).await.unwrap_err();
        assert!(matches!(err, AppError::KeysExhausted));
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_quota_mirror_skips_key_without_remote_call() {
        let h = harness(&["key-1", "key-2"]);
        h.cache.update_quota_usage(0, 9_500, true);
        h.api.script("key-2", ScriptedCall::Page(vec![video("a")]));

        let outcome = h.client.fetch("rust", 50, None).await.unwrap();
        assert_eq!(outcome.stored_count, 1);
        // Key 1 was never used for a remote call.
        assert_eq!(h.api.calls(), vec![("key-2".to_string(), "rust".to_string())]);
    }

    #[tokio::test]
    async fn test_zero_new_items_marks_query_for_skipping() {
        let h = harness(&["key-1"]);
        h.api.script("key-1", ScriptedCall::Page(vec![video("a")]));
        h.client.fetch("rust", 50, None).await.unwrap();

        // Same items again: nothing new is stored.
        h.api.script("key-1", ScriptedCall::Page(vec![video("a")]));
        h.cache.clear(Some("search:*"));
        let outcome = h.client.fetch("rust", 50, None).await.unwrap();
        assert_eq!(outcome.stored_count, 0);

        assert!(h.cache.should_skip_query("rust", SKIP_THRESHOLD_HOURS));
    }
}
