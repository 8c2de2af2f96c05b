// src/storage/videos.rs

//! Canonical video persistence with dedup by external id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, Transaction};

use crate::error::Result;
use crate::models::{StoredVideo, Video};

use super::{from_epoch, Database};

const VIDEO_COLUMNS: &str = "video_id, title, description, published_at,
     thumbnail_default, thumbnail_medium, thumbnail_high,
     channel_id, channel_title, duration, view_count,
     created_at, updated_at";

/// Summary statistics over the stored videos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub total_videos: u64,
    pub latest_published: Option<DateTime<Utc>>,
    pub oldest_published: Option<DateTime<Utc>>,
}

/// Upsert store for video rows.
pub struct VideoStore {
    db: Arc<Database>,
}

impl VideoStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upsert every item of one fetch cycle in a single transaction.
    ///
    /// A failure mid-batch rolls the whole cycle back. Returns how many
    /// rows were newly inserted.
    pub fn upsert_all(&self, items: &[Video], now: DateTime<Utc>) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }
        self.db.with_tx(|tx| {
            let mut stored = 0u64;
            for video in items {
                if upsert_in_tx(tx, video, now)? {
                    stored += 1;
                }
            }
            Ok(stored)
        })
    }

    /// Look up a single video by external id.
    pub fn get(&self, video_id: &str) -> Result<Option<StoredVideo>> {
        self.db.with_conn(|conn| {
            let video = conn
                .query_row(
                    &format!("SELECT {} FROM videos WHERE video_id = ?1", VIDEO_COLUMNS),
                    [video_id],
                    row_to_stored,
                )
                .optional()?;
            Ok(video)
        })
    }

    /// List videos ordered by publish timestamp descending.
    pub fn list_recent(&self, offset: u64, limit: u64) -> Result<Vec<StoredVideo>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM videos
                 ORDER BY published_at DESC
                 LIMIT ?1 OFFSET ?2",
                VIDEO_COLUMNS
            ))?;
            let rows = stmt.query_map([limit, offset], row_to_stored)?;
            collect_rows(rows)
        })
    }

    /// Word-wise search over title and description.
    ///
    /// Every whitespace-separated word must match title OR description
    /// (case-insensitive substring). An empty query matches nothing.
    pub fn search(&self, query: &str, offset: u64, limit: u64) -> Result<Vec<StoredVideo>> {
        let words: Vec<&str> = query.split_whitespace().collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let conditions: Vec<String> = (1..=words.len())
            .map(|i| format!("(title LIKE ?{0} OR description LIKE ?{0})", i))
            .collect();
        let sql = format!(
            "SELECT {} FROM videos
             WHERE {}
             ORDER BY published_at DESC
             LIMIT ?{} OFFSET ?{}",
            VIDEO_COLUMNS,
            conditions.join(" AND "),
            words.len() + 1,
            words.len() + 2,
        );

        let mut params: Vec<rusqlite::types::Value> = words
            .iter()
            .map(|w| rusqlite::types::Value::Text(format!("%{}%", w)))
            .collect();
        params.push(rusqlite::types::Value::Integer(limit as i64));
        params.push(rusqlite::types::Value::Integer(offset as i64));

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params), row_to_stored)?;
            collect_rows(rows)
        })
    }

    /// Total number of stored videos.
    pub fn count(&self) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM videos", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Summary statistics (total count, newest/oldest publish timestamp).
    pub fn stats(&self) -> Result<StoreStats> {
        self.db.with_conn(|conn| {
            let (total, latest, oldest): (i64, Option<i64>, Option<i64>) = conn.query_row(
                "SELECT COUNT(*), MAX(published_at), MIN(published_at) FROM videos",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            Ok(StoreStats {
                total_videos: total as u64,
                latest_published: latest.map(from_epoch),
                oldest_published: oldest.map(from_epoch),
            })
        })
    }
}

/// Upsert one video inside an open transaction.
///
/// Inserts when the external id is unseen; otherwise overwrites every
/// mutable field while preserving `video_id` and `created_at`. Returns
/// whether the row is new.
fn upsert_in_tx(tx: &Transaction, video: &Video, now: DateTime<Utc>) -> Result<bool> {
    let exists: Option<i64> = tx
        .query_row(
            "SELECT id FROM videos WHERE video_id = ?1",
            [&video.video_id],
            |row| row.get(0),
        )
        .optional()?;

    match exists {
        None => {
            tx.execute(
                "INSERT INTO videos
                     (video_id, title, description, published_at,
                      thumbnail_default, thumbnail_medium, thumbnail_high,
                      channel_id, channel_title, duration, view_count,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                rusqlite::params![
                    video.video_id,
                    video.title,
                    video.description,
                    video.published_at.timestamp(),
                    video.thumbnail_default,
                    video.thumbnail_medium,
                    video.thumbnail_high,
                    video.channel_id,
                    video.channel_title,
                    video.duration,
                    video.view_count,
                    now.timestamp(),
                ],
            )?;
            Ok(true)
        }
        Some(id) => {
            tx.execute(
                "UPDATE videos SET
                     title = ?1, description = ?2, published_at = ?3,
                     thumbnail_default = ?4, thumbnail_medium = ?5,
                     thumbnail_high = ?6, channel_id = ?7, channel_title = ?8,
                     duration = ?9, view_count = ?10, updated_at = ?11
                 WHERE id = ?12",
                rusqlite::params![
                    video.title,
                    video.description,
                    video.published_at.timestamp(),
                    video.thumbnail_default,
                    video.thumbnail_medium,
                    video.thumbnail_high,
                    video.channel_id,
                    video.channel_title,
                    video.duration,
                    video.view_count,
                    now.timestamp(),
                    id,
                ],
            )?;
            Ok(false)
        }
    }
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredVideo> {
    Ok(StoredVideo {
        video: Video {
            video_id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            published_at: from_epoch(row.get(3)?),
            thumbnail_default: row.get(4)?,
            thumbnail_medium: row.get(5)?,
            thumbnail_high: row.get(6)?,
            channel_id: row.get(7)?,
            channel_title: row.get(8)?,
            duration: row.get(9)?,
            view_count: row.get(10)?,
        },
        created_at: from_epoch(row.get(11)?),
        updated_at: from_epoch(row.get(12)?),
    })
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<StoredVideo>>,
) -> Result<Vec<StoredVideo>> {
    let mut videos = Vec::new();
    for row in rows {
        videos.push(row?);
    }
    Ok(videos)
}
