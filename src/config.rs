//! Indexer configuration
//!
//! Loaded from TOML; every field has a default so a partial file works.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::AccountType;

/// Indexer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// How long shutdown waits for pending settlements to fire (ms)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// How long shutdown waits for interrupted timers to stop (ms)
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Maximum settlement timers in flight
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Event broadcast capacity
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Account types accepted by the indexer
    #[serde(default = "default_tracked_types")]
    pub tracked_types: Vec<AccountType>,

    /// Arrival simulation
    #[serde(default)]
    pub driver: DriverConfig,
}

fn default_shutdown_grace_ms() -> u64 {
    20_000
}
fn default_stop_timeout_ms() -> u64 {
    1_000
}
fn default_max_in_flight() -> usize {
    10_000
}
fn default_event_buffer() -> usize {
    1_024
}
fn default_tracked_types() -> Vec<AccountType> {
    AccountType::ALL.to_vec()
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            event_buffer: default_event_buffer(),
            tracked_types: default_tracked_types(),
            driver: DriverConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from environment or default path
    pub fn from_env() -> Self {
        let path = std::env::var("INDEXER_CONFIG_PATH")
            .unwrap_or_else(|_| "indexer_config.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default indexer config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Arrival jitter for the load driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Lower bound of the delay before each submission (ms, inclusive)
    #[serde(default)]
    pub min_jitter_ms: u64,

    /// Upper bound of the delay before each submission (ms, inclusive)
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,

    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_max_jitter_ms() -> u64 {
    1_000
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            min_jitter_ms: 0,
            max_jitter_ms: default_max_jitter_ms(),
            seed: None,
        }
    }
}

impl DriverConfig {
    /// No delay between submissions.
    pub fn immediate() -> Self {
        Self {
            min_jitter_ms: 0,
            max_jitter_ms: 0,
            seed: Some(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: IndexerConfig = toml::from_str(
            r#"
            shutdown_grace_ms = 500
            tracked_types = ["mint", "escrow"]

            [driver]
            seed = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.shutdown_grace(), Duration::from_millis(500));
        assert_eq!(config.stop_timeout_ms, 1_000);
        assert_eq!(config.max_in_flight, 10_000);
        assert_eq!(config.tracked_types, vec![AccountType::Mint, AccountType::Escrow]);
        assert_eq!(config.driver.seed, Some(7));
        assert_eq!(config.driver.max_jitter_ms, 1_000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexer_config.toml");

        let mut config = IndexerConfig::default();
        config.max_in_flight = 3;
        config.driver = DriverConfig::immediate();
        config.save(&path).unwrap();

        assert_eq!(IndexerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_unknown_account_type_rejected() {
        let result: Result<IndexerConfig, _> = toml::from_str(r#"tracked_types = ["token"]"#);
        assert!(result.is_err());
    }
}
