// src/models/video.rs

//! Video metadata structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized video metadata as returned by one fetch cycle.
///
/// This is the exact field set eligible for overwrite on upsert; the
/// external id is the dedup key and is never rewritten once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Video {
    /// External video id (unique, immutable)
    pub video_id: String,

    /// Video title
    pub title: String,

    /// Video description
    pub description: String,

    /// Publish timestamp (ordering key)
    pub published_at: DateTime<Utc>,

    /// Default-size thumbnail URL
    pub thumbnail_default: String,

    /// Medium-size thumbnail URL
    pub thumbnail_medium: String,

    /// High-size thumbnail URL
    pub thumbnail_high: String,

    /// Channel external id
    pub channel_id: String,

    /// Channel display name
    pub channel_title: String,

    /// Encoded duration string (ISO 8601, opaque to this engine)
    pub duration: String,

    /// View count, absent when the detail call did not cover this id
    pub view_count: Option<i64>,
}

impl Video {
    /// Merge detail-call fields into this video.
    pub fn apply_details(&mut self, details: &VideoDetails) {
        self.duration = details.duration.clone();
        self.view_count = details.view_count;
    }
}

/// Duration and view count for a single video, from the batched detail call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoDetails {
    pub video_id: String,
    pub duration: String,
    pub view_count: Option<i64>,
}

/// A video row as persisted, including the server-assigned timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredVideo {
    #[serde(flatten)]
    pub video: Video,

    /// First time this external id was ingested
    pub created_at: DateTime<Utc>,

    /// Last time any field was overwritten
    pub updated_at: DateTime<Utc>,
}

/// Result of one ingestion fetch cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchOutcome {
    /// Normalized items, newest first
    pub items: Vec<Video>,

    /// Continuation token for the next page, if any
    pub next_page_token: Option<String>,

    /// Total result count reported by the remote API
    pub total_results: u64,

    /// How many items were newly inserted this cycle
    pub stored_count: u64,

    /// Served from the search-result cache (no remote call)
    pub cached: bool,

    /// Short-circuited by a fresh zero-new-items skip marker
    pub skipped: bool,
}

impl FetchOutcome {
    /// Outcome for a query short-circuited by its skip marker.
    pub fn skipped() -> Self {
        Self {
            cached: true,
            skipped: true,
            ..Self::default()
        }
    }

    /// Outcome served from the search-result cache.
    pub fn from_cache(items: Vec<Video>) -> Self {
        Self {
            total_results: items.len() as u64,
            items,
            cached: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_video() -> Video {
        Video {
            video_id: "abc123".to_string(),
            title: "Test Video".to_string(),
            description: "A test".to_string(),
            published_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            thumbnail_default: "https://example.com/d.jpg".to_string(),
            thumbnail_medium: "https://example.com/m.jpg".to_string(),
            thumbnail_high: "https://example.com/h.jpg".to_string(),
            channel_id: "chan1".to_string(),
            channel_title: "Channel".to_string(),
            duration: String::new(),
            view_count: None,
        }
    }

    #[test]
    fn test_apply_details() {
        let mut video = sample_video();
        video.apply_details(&VideoDetails {
            video_id: "abc123".to_string(),
            duration: "PT4M13S".to_string(),
            view_count: Some(42),
        });

        assert_eq!(video.duration, "PT4M13S");
        assert_eq!(video.view_count, Some(42));
    }

    #[test]
    fn test_skipped_outcome_is_flagged() {
        let outcome = FetchOutcome::skipped();
        assert!(outcome.skipped);
        assert!(outcome.cached);
        assert!(outcome.items.is_empty());
    }
}
