// src/config.rs

//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Environment variables checked for API credentials, in pool order.
const KEY_ENV_VARS: [&str; 3] = ["YOUTUBE_API_KEY", "YOUTUBE_API_KEY_2", "YOUTUBE_API_KEY_3"];

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote API and fetch behavior settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Background polling settings
    #[serde(default)]
    pub poll: PollConfig,

    /// SQLite database path
    #[serde(default = "defaults::db_path")]
    pub db_path: String,

    /// Rotation list of search queries for the background poller
    #[serde(default = "defaults::queries")]
    pub queries: Vec<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            return Err(AppError::validation("queries must not be empty"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if self.fetch.max_results == 0 || self.fetch.max_results > 50 {
            return Err(AppError::validation("fetch.max_results must be 1..=50"));
        }
        if self.poll.batch_size == 0 || self.poll.batch_size > 50 {
            return Err(AppError::validation("poll.batch_size must be 1..=50"));
        }
        if self.poll.interval_secs == 0 {
            return Err(AppError::validation("poll.interval_secs must be > 0"));
        }
        if self.db_path.trim().is_empty() {
            return Err(AppError::validation("db_path is empty"));
        }
        Ok(())
    }

    /// Read API credentials from the environment, in pool order.
    ///
    /// An empty list is valid but degraded: every fetch fails fast with
    /// the exhaustion condition.
    pub fn api_keys_from_env() -> Vec<String> {
        let keys: Vec<String> = KEY_ENV_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty())
            .collect();

        if keys.is_empty() {
            log::warn!("No YouTube API keys found in environment variables");
        }
        keys
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            poll: PollConfig::default(),
            db_path: defaults::db_path(),
            queries: defaults::queries(),
        }
    }
}

/// Remote API and interactive fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// HTTP request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Page size for interactive fetches (remote API caps at 50)
    #[serde(default = "defaults::max_results")]
    pub max_results: u32,

    /// Trailing publish window in days for search calls
    #[serde(default = "defaults::window_days")]
    pub window_days: i64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::timeout(),
            max_results: defaults::max_results(),
            window_days: defaults::window_days(),
        }
    }
}

/// Background polling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Sleep between fetch cycles, in seconds
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// Long backoff after total quota exhaustion, in seconds
    #[serde(default = "defaults::backoff")]
    pub backoff_secs: u64,

    /// Reduced page size for background fetches, to bound per-cycle cost
    #[serde(default = "defaults::batch_size")]
    pub batch_size: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            backoff_secs: defaults::backoff(),
            batch_size: defaults::batch_size(),
        }
    }
}

mod defaults {
    pub fn db_path() -> String {
        "vidfeed.db".to_string()
    }

    pub fn timeout() -> u64 {
        30
    }

    pub fn max_results() -> u32 {
        50
    }

    pub fn window_days() -> i64 {
        7
    }

    pub fn interval() -> u64 {
        10
    }

    pub fn backoff() -> u64 {
        3600
    }

    pub fn batch_size() -> u32 {
        25
    }

    pub fn queries() -> Vec<String> {
        [
            "programming",
            "coding tutorial",
            "software development",
            "tech news",
            "machine learning",
            "web development",
            "music",
            "movie trailers",
            "gaming",
            "breaking news",
            "world news",
            "cooking",
            "travel",
            "fitness workout",
            "science",
            "documentary",
            "how to",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_batch() {
        let mut config = Config::default();
        config.poll.batch_size = 51;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_queries() {
        let mut config = Config::default();
        config.queries.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[poll]\ninterval_secs = 30\n").unwrap();
        assert_eq!(config.poll.interval_secs, 30);
        assert_eq!(config.poll.backoff_secs, 3600);
        assert_eq!(config.fetch.max_results, 50);
        assert!(!config.queries.is_empty());
    }
}
