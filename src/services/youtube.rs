// src/services/youtube.rs

//! Remote video-platform API client.
//!
//! Typed wrapper around the YouTube Data API v3 `search.list` and
//! `videos.list` endpoints. Quota-exceeded responses (HTTP 403 with a
//! quota reason) are mapped to a dedicated error variant so the caller
//! can fail over to the next credential.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{Video, VideoDetails};

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const VIDEOS_URL: &str = "https://www.googleapis.com/youtube/v3/videos";

/// Quota units charged for one search call.
pub const SEARCH_QUOTA_COST: u64 = 100;

/// Quota units charged per id in a batched detail call.
pub const DETAIL_QUOTA_COST_PER_ID: u64 = 1;

/// One page of normalized search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<Video>,
    pub next_page_token: Option<String>,
    pub total_results: u64,
}

/// Port to the remote search and detail endpoints.
#[async_trait]
pub trait VideoApi: Send + Sync {
    /// Search for videos published after the given instant, newest first.
    async fn search(
        &self,
        api_key: &str,
        query: &str,
        published_after: DateTime<Utc>,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<SearchPage>;

    /// Fetch duration and view count for a batch of video ids.
    async fn video_details(&self, api_key: &str, video_ids: &[String]) -> Result<Vec<VideoDetails>>;
}

/// reqwest-backed implementation of [`VideoApi`].
pub struct YouTubeApi {
    client: reqwest::Client,
}

impl YouTubeApi {
    /// Create a client with an explicit per-call timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Issue a GET and decode the JSON body, mapping quota failures.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let response = self.client.get(url).query(params).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 403 && body.contains("quotaExceeded") {
                return Err(AppError::QuotaExceeded);
            }
            let message: String = body.chars().take(300).collect();
            return Err(AppError::api(status.as_u16(), message));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl VideoApi for YouTubeApi {
    async fn search(
        &self,
        api_key: &str,
        query: &str,
        published_after: DateTime<Utc>,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<SearchPage> {
        let max_results = max_results.min(50).to_string();
        let published_after = published_after.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut params = vec![
            ("key", api_key),
            ("q", query),
            ("part", "id,snippet"),
            ("type", "video"),
            ("order", "date"),
            ("publishedAfter", published_after.as_str()),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response: SearchResponse = self.get_json(SEARCH_URL, &params).await?;
        Ok(SearchPage {
            items: response
                .items
                .into_iter()
                .filter_map(normalize_search_item)
                .collect(),
            next_page_token: response.next_page_token,
            total_results: response.page_info.total_results,
        })
    }

    async fn video_details(&self, api_key: &str, video_ids: &[String]) -> Result<Vec<VideoDetails>> {
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = video_ids.join(",");
        let params = [
            ("key", api_key),
            ("part", "contentDetails,statistics"),
            ("id", ids.as_str()),
        ];

        let response: DetailsResponse = self.get_json(VIDEOS_URL, &params).await?;
        Ok(response.items.into_iter().map(normalize_detail_item).collect())
    }
}

/// Turn a raw search item into a [`Video`]; items without a video id
/// (channels, playlists) are dropped.
fn normalize_search_item(item: SearchItem) -> Option<Video> {
    let video_id = item.id.video_id?;
    let snippet = item.snippet;
    Some(Video {
        video_id,
        title: snippet.title,
        description: snippet.description,
        published_at: snippet.published_at,
        thumbnail_default: thumb_url(snippet.thumbnails.default),
        thumbnail_medium: thumb_url(snippet.thumbnails.medium),
        thumbnail_high: thumb_url(snippet.thumbnails.high),
        channel_id: snippet.channel_id,
        channel_title: snippet.channel_title,
        duration: String::new(),
        view_count: None,
    })
}

fn normalize_detail_item(item: DetailItem) -> VideoDetails {
    VideoDetails {
        video_id: item.id,
        duration: item.content_details.duration,
        view_count: item
            .statistics
            .view_count
            .and_then(|count| count.parse().ok()),
    }
}

fn thumb_url(thumb: Option<Thumbnail>) -> String {
    thumb.map(|t| t.url).unwrap_or_default()
}

// --- Wire format ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
    #[serde(default)]
    page_info: PageInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    total_results: u64,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    thumbnails: Thumbnails,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    channel_title: String,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    items: Vec<DetailItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailItem {
    id: String,
    #[serde(default)]
    content_details: ContentDetails,
    #[serde(default)]
    statistics: Statistics,
}

#[derive(Debug, Default, Deserialize)]
struct ContentDetails {
    #[serde(default)]
    duration: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
}
