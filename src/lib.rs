// src/lib.rs

//! vidfeed: quota-aware video metadata ingestion.
//!
//! Polls a remote video platform for fresh metadata across a rotating set
//! of search queries, spending a strictly limited daily API quota across
//! a pool of credentials, and upserts the results into SQLite behind a
//! TTL cache.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod services;
pub mod storage;
