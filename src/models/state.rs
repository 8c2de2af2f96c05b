// src/models/state.rs

//! Bookkeeping rows: per-query fetch state and per-credential quota usage.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Fetch bookkeeping for a single search query.
///
/// Created on the first fetch of the query, updated on every fetch after
/// that, never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryFetchState {
    /// The search query (unique key)
    pub query: String,

    /// When the query was last fetched from the remote API
    pub last_fetched: DateTime<Utc>,

    /// Item count of the most recent fetch
    pub total_results: u64,

    /// Opaque continuation token from the most recent response
    pub next_page_token: Option<String>,
}

/// Daily quota ledger row for one API credential.
///
/// The credential itself is stored only as a sha256 fingerprint. The row
/// self-heals across day boundaries: the first touch on a new UTC date
/// resets `quota_used` and `exhausted` before any read or write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyUsage {
    /// sha256 hex digest of the raw credential
    pub key_hash: String,

    /// Quota units consumed since the last reset
    pub quota_used: u64,

    /// UTC date of the last reset
    pub last_reset: NaiveDate,

    /// Whether the credential crossed the daily safety threshold
    pub exhausted: bool,
}

impl KeyUsage {
    /// Fresh ledger row for a credential, as of the given date.
    pub fn fresh(key_hash: impl Into<String>, today: NaiveDate) -> Self {
        Self {
            key_hash: key_hash.into(),
            quota_used: 0,
            last_reset: today,
            exhausted: false,
        }
    }

    /// Reset the row if its last reset is older than `today`.
    pub fn roll_over(&mut self, today: NaiveDate) {
        if self.last_reset < today {
            self.quota_used = 0;
            self.exhausted = false;
            self.last_reset = today;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_roll_over_resets_on_new_day() {
        let mut usage = KeyUsage::fresh("hash", date(2025, 6, 1));
        usage.quota_used = 9800;
        usage.exhausted = true;

        usage.roll_over(date(2025, 6, 2));
        assert_eq!(usage.quota_used, 0);
        assert!(!usage.exhausted);
        assert_eq!(usage.last_reset, date(2025, 6, 2));
    }

    #[test]
    fn test_roll_over_same_day_is_noop() {
        let mut usage = KeyUsage::fresh("hash", date(2025, 6, 1));
        usage.quota_used = 500;

        usage.roll_over(date(2025, 6, 1));
        assert_eq!(usage.quota_used, 500);
    }
}
