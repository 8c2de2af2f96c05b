// src/storage/state.rs

//! Per-query fetch bookkeeping and the per-credential quota ledger.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Transaction};

use crate::error::Result;
use crate::models::{KeyUsage, QueryFetchState};

use super::{from_epoch, Database};

/// Store for [`QueryFetchState`] rows.
pub struct QueryStateStore {
    db: Arc<Database>,
}

impl QueryStateStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create or update the fetch state for a query.
    pub fn upsert(
        &self,
        query: &str,
        total_results: u64,
        next_page_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO query_fetch_state
                     (query, last_fetched, total_results, next_page_token,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?2, ?2)
                 ON CONFLICT(query) DO UPDATE SET
                     last_fetched = excluded.last_fetched,
                     total_results = excluded.total_results,
                     next_page_token = excluded.next_page_token,
                     updated_at = excluded.updated_at",
                rusqlite::params![query, now.timestamp(), total_results, next_page_token],
            )?;
            Ok(())
        })
    }

    /// Look up the fetch state for a query.
    pub fn get(&self, query: &str) -> Result<Option<QueryFetchState>> {
        self.db.with_conn(|conn| {
            let state = conn
                .query_row(
                    "SELECT query, last_fetched, total_results, next_page_token
                     FROM query_fetch_state WHERE query = ?1",
                    [query],
                    |row| {
                        Ok(QueryFetchState {
                            query: row.get(0)?,
                            last_fetched: from_epoch(row.get(1)?),
                            total_results: row.get::<_, i64>(2)? as u64,
                            next_page_token: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(state)
        })
    }
}

/// Store for the daily quota ledger.
///
/// Every access rolls the row over to today before reading or writing, so
/// the ledger self-heals at day boundaries without a timer.
pub struct KeyUsageStore {
    db: Arc<Database>,
}

impl KeyUsageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Add quota cost to a credential's ledger row, creating it if absent.
    ///
    /// Runs as a transactional read-modify-write; the row is marked
    /// exhausted once usage reaches `threshold`. Returns the updated row.
    pub fn track(
        &self,
        key_hash: &str,
        cost: u64,
        threshold: u64,
        now: DateTime<Utc>,
    ) -> Result<KeyUsage> {
        self.db.with_tx(|tx| {
            let mut usage = load_or_fresh(tx, key_hash, now)?;
            usage.quota_used += cost;
            if usage.quota_used >= threshold {
                usage.exhausted = true;
            }
            save(tx, &usage, now)?;
            Ok(usage)
        })
    }

    /// Persist the exhausted flag for a credential.
    pub fn mark_exhausted(&self, key_hash: &str, now: DateTime<Utc>) -> Result<KeyUsage> {
        self.db.with_tx(|tx| {
            let mut usage = load_or_fresh(tx, key_hash, now)?;
            usage.exhausted = true;
            save(tx, &usage, now)?;
            Ok(usage)
        })
    }

    /// Read a credential's ledger row with today's rollover applied.
    pub fn get(&self, key_hash: &str, now: DateTime<Utc>) -> Result<Option<KeyUsage>> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT key_hash, quota_used, last_reset, exhausted
                     FROM api_key_usage WHERE key_hash = ?1",
                    [key_hash],
                    row_to_usage,
                )
                .optional()?;
            Ok(row.map(|mut usage| {
                usage.roll_over(now.date_naive());
                usage
            }))
        })
    }
}

fn load_or_fresh(tx: &Transaction, key_hash: &str, now: DateTime<Utc>) -> Result<KeyUsage> {
    let today = now.date_naive();
    let row = tx
        .query_row(
            "SELECT key_hash, quota_used, last_reset, exhausted
             FROM api_key_usage WHERE key_hash = ?1",
            [key_hash],
            row_to_usage,
        )
        .optional()?;

    match row {
        Some(mut usage) => {
            usage.roll_over(today);
            Ok(usage)
        }
        None => Ok(KeyUsage::fresh(key_hash, today)),
    }
}

fn save(tx: &Transaction, usage: &KeyUsage, now: DateTime<Utc>) -> Result<()> {
    tx.execute(
        "INSERT INTO api_key_usage
             (key_hash, quota_used, last_reset, exhausted, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(key_hash) DO UPDATE SET
             quota_used = excluded.quota_used,
             last_reset = excluded.last_reset,
             exhausted = excluded.exhausted,
             updated_at = excluded.updated_at",
        rusqlite::params![
            usage.key_hash,
            usage.quota_used,
            usage.last_reset.to_string(),
            usage.exhausted,
            now.timestamp(),
        ],
    )?;
    Ok(())
}

fn row_to_usage(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeyUsage> {
    let last_reset: String = row.get(2)?;
    let last_reset = last_reset
        .parse::<NaiveDate>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(KeyUsage {
        key_hash: row.get(0)?,
        quota_used: row.get::<_, i64>(1)? as u64,
        last_reset,
        exhausted: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_query_state_upsert_and_get() {
        let store = QueryStateStore::new(Arc::new(Database::in_memory().unwrap()));
        assert_eq!(store.get("rust").unwrap(), None);

        store.upsert("rust", 25, Some("tok1"), at(1, 0)).unwrap();
        store.upsert("rust", 10, None, at(1, 5)).unwrap();

        let state = store.get("rust").unwrap().unwrap();
        assert_eq!(state.total_results, 10);
        assert_eq!(state.next_page_token, None);
        assert_eq!(state.last_fetched, at(1, 5));
    }

    #[test]
    fn test_track_accumulates_and_exhausts() {
        let store = KeyUsageStore::new(Arc::new(Database::in_memory().unwrap()));

        for _ in 0..94 {
            let usage = store.track("hash", 100, 9_500, at(1, 0)).unwrap();
            assert!(!usage.exhausted);
        }
        let usage = store.track("hash", 100, 9_500, at(1, 0)).unwrap();
        assert_eq!(usage.quota_used, 9_500);
        assert!(usage.exhausted);
    }

    #[test]
    fn test_track_resets_on_day_rollover() {
        let store = KeyUsageStore::new(Arc::new(Database::in_memory().unwrap()));
        store.track("hash", 9_400, 9_500, at(1, 23)).unwrap();
        store.mark_exhausted("hash", at(1, 23)).unwrap();

        // First touch on the next day resets before adding.
        let usage = store.track("hash", 100, 9_500, at(2, 0)).unwrap();
        assert_eq!(usage.quota_used, 100);
        assert!(!usage.exhausted);
        assert_eq!(usage.last_reset, at(2, 0).date_naive());
    }

    #[test]
    fn test_get_applies_rollover_without_writing() {
        let store = KeyUsageStore::new(Arc::new(Database::in_memory().unwrap()));
        store.track("hash", 500, 9_500, at(1, 0)).unwrap();

        let usage = store.get("hash", at(2, 0)).unwrap().unwrap();
        assert_eq!(usage.quota_used, 0);
        assert!(!usage.exhausted);
    }
}
