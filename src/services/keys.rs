// src/services/keys.rs

//! API credential pool with daily quota tracking.
//!
//! Holds an ordered list of credentials and advances through it as keys
//! run out of daily quota. There is no wraparound: once the pool is
//! advanced past the end it stays unavailable until a day boundary (the
//! ledger self-heals) or an external reset.

use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::error::Result;
use crate::models::KeyUsage;
use crate::storage::KeyUsageStore;

/// Daily quota allowance per credential (remote API hard cap).
pub const DAILY_QUOTA_LIMIT: u64 = 10_000;

/// Usage level at which a credential is treated as exhausted. Kept below
/// the hard cap so an in-flight cycle cannot overrun it.
pub const QUOTA_EXHAUST_THRESHOLD: u64 = 9_500;

/// Ordered credential pool backed by the persistent quota ledger.
pub struct KeyPool {
    keys: Vec<String>,
    hashes: Vec<String>,
    current: Mutex<usize>,
    ledger: KeyUsageStore,
    clock: Arc<dyn Clock>,
}

impl KeyPool {
    /// Build a pool from raw credentials. An empty pool is valid but
    /// degraded: every fetch fails fast with the exhaustion condition.
    pub fn new(keys: Vec<String>, ledger: KeyUsageStore, clock: Arc<dyn Clock>) -> Self {
        if keys.is_empty() {
            log::warn!("API key pool is empty; all fetches will fail fast");
        }
        let hashes = keys.iter().map(|key| fingerprint(key)).collect();
        Self {
            keys,
            hashes,
            current: Mutex::new(0),
            ledger,
            clock,
        }
    }

    /// Number of credentials configured.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The active credential, or `None` once the pool is exhausted past
    /// the end of the list.
    pub fn current_key(&self) -> Option<(usize, String)> {
        let index = *self.current.lock().expect("key pool lock poisoned");
        self.keys.get(index).map(|key| (index, key.clone()))
    }

    /// Charge quota cost to the active credential's ledger row.
    ///
    /// The write is a transactional read-modify-write; crossing the
    /// exhaustion threshold flips the row's flag. Returns the updated row,
    /// or `None` when no credential is active.
    pub fn track_usage(&self, cost: u64) -> Result<Option<KeyUsage>> {
        let Some((index, _)) = self.current_key() else {
            return Ok(None);
        };
        let usage =
            self.ledger
                .track(&self.hashes[index], cost, QUOTA_EXHAUST_THRESHOLD, self.clock.now())?;
        if usage.exhausted {
            log::warn!(
                "API key {} crossed the daily quota threshold ({}/{})",
                index,
                usage.quota_used,
                DAILY_QUOTA_LIMIT
            );
        }
        Ok(Some(usage))
    }

    /// Persist the exhausted flag for the active credential.
    pub fn mark_current_exhausted(&self) -> Result<()> {
        if let Some((index, _)) = self.current_key() {
            self.ledger.mark_exhausted(&self.hashes[index], self.clock.now())?;
            log::warn!("API key {} marked exhausted", index);
        }
        Ok(())
    }

    /// Advance to the next credential. Returns whether one is available.
    pub fn switch_to_next(&self) -> bool {
        let mut index = self.current.lock().expect("key pool lock poisoned");
        if *index < self.keys.len() {
            *index += 1;
        }
        let available = *index < self.keys.len();
        if available {
            log::info!("Switched to API key {}", *index);
        } else {
            log::warn!("No API keys remaining in the pool");
        }
        available
    }

    /// Reset the pool to the first credential (external reset hook).
    pub fn reset(&self) {
        *self.current.lock().expect("key pool lock poisoned") = 0;
    }

    /// Ledger row for the active credential, with rollover applied.
    pub fn current_usage(&self) -> Result<Option<KeyUsage>> {
        let Some((index, _)) = self.current_key() else {
            return Ok(None);
        };
        self.ledger.get(&self.hashes[index], self.clock.now())
    }
}

/// One-way fingerprint of a credential; the raw secret is never stored.
fn fingerprint(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
