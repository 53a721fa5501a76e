//! Sync configuration
//!
//! Configuration for catalog syncs loaded from `SYNC_*` environment variables.
//! A variable that is set but does not parse is an error, not a silent default.

use grimoire_common::SyncType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CATALOG_URL: &str = "https://api.scryfall.com";
const DEFAULT_USER_AGENT: &str = concat!("grimoire/", env!("CARGO_PKG_VERSION"));
const DEFAULT_STORAGE_ROOT: &str = "storage";
const DEFAULT_PROVIDER: &str = "scryfall";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STATUS_POLL_SECS: u64 = 5;
const DEFAULT_MAX_QUEUED_BATCHES: usize = 64;
const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_BATCH_SIZE: usize = 500;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 4;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_AUTO_INTERVAL_SECS: u64 = 86400; // 1 day

const MIN_CHUNK_SIZE: usize = 1024 * 1024;
const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Configuration for catalog syncs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base URL of the catalog API (bulk-data discovery lives under it)
    pub catalog_url: String,
    pub user_agent: String,
    /// Root of the local storage layout `<root>/<provider>/<sync_type>/<file>`
    pub storage_root: PathBuf,
    pub provider: String,
    /// Whole-request limit for metadata calls and the longest a download may sit
    /// without receiving a byte; a download's total duration is unbounded
    pub http_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// How often a running download re-reads its record to notice outside cancels
    pub status_poll_secs: u64,
    /// Bytes written between cancellation checks
    pub chunk_size: usize,
    /// Records per import batch
    pub batch_size: usize,
    /// Attempts per batch import job, including the first
    pub max_attempts: u32,
    pub max_concurrent_batches: usize,
    /// Batches held in memory (running or waiting to run) before the reader pauses
    pub max_queued_batches: usize,
    pub retry_backoff_ms: u64,
    pub enabled_types: Vec<SyncType>,
    /// Periodically trigger every enabled sync type
    pub auto_sync: bool,
    pub auto_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            provider: DEFAULT_PROVIDER.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            status_poll_secs: DEFAULT_STATUS_POLL_SECS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            max_queued_batches: DEFAULT_MAX_QUEUED_BATCHES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            enabled_types: SyncType::ALL.to_vec(),
            auto_sync: false,
            auto_interval_secs: DEFAULT_AUTO_INTERVAL_SECS,
        }
    }
}

impl SyncConfig {
    /// Load sync configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let enabled_types = match std::env::var("SYNC_ENABLED_TYPES") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<SyncType>())
                .collect::<Result<Vec<_>, _>>()?,
            _ => defaults.enabled_types,
        };

        let config = Self {
            catalog_url: std::env::var("SYNC_CATALOG_URL")
                .unwrap_or(defaults.catalog_url)
                .trim_end_matches('/')
                .to_string(),
            user_agent: std::env::var("SYNC_USER_AGENT").unwrap_or(defaults.user_agent),
            storage_root: std::env::var("SYNC_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            provider: std::env::var("SYNC_PROVIDER").unwrap_or(defaults.provider),
            http_timeout_secs: env_or("SYNC_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
            connect_timeout_secs: env_or(
                "SYNC_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?,
            status_poll_secs: env_or("SYNC_STATUS_POLL_SECS", DEFAULT_STATUS_POLL_SECS)?,
            chunk_size: env_or("SYNC_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            batch_size: env_or("SYNC_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            max_attempts: env_or("SYNC_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            max_concurrent_batches: env_or(
                "SYNC_MAX_CONCURRENT_BATCHES",
                DEFAULT_MAX_CONCURRENT_BATCHES,
            )?,
            max_queued_batches: env_or("SYNC_MAX_QUEUED_BATCHES", DEFAULT_MAX_QUEUED_BATCHES)?,
            retry_backoff_ms: env_or("SYNC_RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS)?,
            enabled_types,
            auto_sync: env_or("SYNC_AUTO_ENABLED", false)?,
            auto_interval_secs: env_or("SYNC_AUTO_INTERVAL_SECS", DEFAULT_AUTO_INTERVAL_SECS)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.catalog_url.is_empty() {
            anyhow::bail!("SYNC_CATALOG_URL cannot be empty");
        }
        if self.provider.is_empty() || self.provider.contains(['/', '\\']) {
            anyhow::bail!("SYNC_PROVIDER must be a single path segment, got: {:?}", self.provider);
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            anyhow::bail!(
                "SYNC_CHUNK_SIZE must be between {} and {} bytes, got: {}",
                MIN_CHUNK_SIZE,
                MAX_CHUNK_SIZE,
                self.chunk_size
            );
        }
        if self.batch_size == 0 {
            anyhow::bail!("SYNC_BATCH_SIZE must be greater than 0");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("SYNC_MAX_ATTEMPTS must be greater than 0");
        }
        if self.max_concurrent_batches == 0 {
            anyhow::bail!("SYNC_MAX_CONCURRENT_BATCHES must be greater than 0");
        }
        if self.max_queued_batches == 0 {
            anyhow::bail!("SYNC_MAX_QUEUED_BATCHES must be greater than 0");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("SYNC_HTTP_TIMEOUT_SECS must be greater than 0");
        }
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("SYNC_CONNECT_TIMEOUT_SECS must be greater than 0");
        }
        if self.status_poll_secs == 0 {
            anyhow::bail!("SYNC_STATUS_POLL_SECS must be greater than 0");
        }
        if self.auto_sync && self.auto_interval_secs == 0 {
            anyhow::bail!("SYNC_AUTO_INTERVAL_SECS must be greater than 0");
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn status_poll(&self) -> Duration {
        Duration::from_secs(self.status_poll_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn auto_interval(&self) -> Duration {
        Duration::from_secs(self.auto_interval_secs)
    }
}

pub(crate) fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => anyhow::bail!("{} is not valid: {}", key, e),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.chunk_size, 2 * 1024 * 1024);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.enabled_types.len(), SyncType::ALL.len());
        assert!(!config.auto_sync);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sync_config_validation_chunk_size_bounds() {
        let mut config = SyncConfig::default();
        config.chunk_size = 512 * 1024;
        assert!(config.validate().is_err());

        config.chunk_size = 5 * 1024 * 1024;
        assert!(config.validate().is_err());

        config.chunk_size = 4 * 1024 * 1024;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sync_config_validation_zero_batch_size() {
        let config = SyncConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sync_config_validation_provider_segment() {
        let config = SyncConfig {
            provider: "scryfall/../etc".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_value_names_the_variable() {
        let err = parse_value::<usize>("SYNC_BATCH_SIZE", "500O").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("SYNC_BATCH_SIZE"));
        assert!(message.contains("500O"));

        assert_eq!(parse_value::<usize>("SYNC_BATCH_SIZE", " 250 ").unwrap(), 250);
        assert!(parse_value::<bool>("SYNC_AUTO_ENABLED", "yes").is_err());
    }

    #[test]
    fn test_env_or_uses_default_only_when_unset() {
        assert_eq!(env_or("GRIMOIRE_TEST_UNSET_VARIABLE", 7u64).unwrap(), 7);
    }

    #[test]
    fn test_sync_config_validation_queue_bound() {
        let config = SyncConfig {
            max_queued_batches: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sync_config_validation_auto_interval() {
        let config = SyncConfig {
            auto_sync: true,
            auto_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
