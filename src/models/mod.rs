// src/models/mod.rs

//! Domain models for the ingestion engine.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod state;
mod video;

// Re-export all public types
pub use state::{KeyUsage, QueryFetchState};
pub use video::{FetchOutcome, StoredVideo, Video, VideoDetails};
