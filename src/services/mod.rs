// src/services/mod.rs

//! Service layer for the ingestion engine.
//!
//! This module contains the business logic for:
//! - Remote API access (`VideoApi` / `YouTubeApi`)
//! - Credential pooling and quota tracking (`KeyPool`)
//! - Fetch cycle orchestration (`IngestClient`)

mod ingest;
mod keys;
mod youtube;

pub use ingest::{IngestClient, SKIP_THRESHOLD_HOURS};
pub use keys::{KeyPool, DAILY_QUOTA_LIMIT, QUOTA_EXHAUST_THRESHOLD};
pub use youtube::{SearchPage, VideoApi, YouTubeApi, DETAIL_QUOTA_COST_PER_ID, SEARCH_QUOTA_COST};
