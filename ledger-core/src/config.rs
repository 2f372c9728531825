//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// gRPC listen address (used by the transport layer)
    pub grpc_listen_addr: String,

    /// Metrics listen address
    pub metrics_listen_addr: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Per-address rate limits
    pub limits: LimitsConfig,

    /// Per-address transfer locks
    pub locking: LockingConfig,

    /// Leaderboard cache
    pub leaderboard: LeaderboardConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ipcoin"),
            service_name: "ipcoin-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            grpc_listen_addr: "0.0.0.0:50051".to_string(),
            metrics_listen_addr: "0.0.0.0:9090".to_string(),
            rocksdb: RocksDBConfig::default(),
            limits: LimitsConfig::default(),
            locking: LockingConfig::default(),
            leaderboard: LeaderboardConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// One token-bucket class
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateClassConfig {
    /// Bucket capacity
    pub burst: u32,

    /// Tokens added per second
    pub refill_per_sec: f64,
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Reads are idempotent, so this class is tolerant
    pub read: RateClassConfig,

    /// Writes move value, so this class is strict
    pub write: RateClassConfig,

    /// Drop an address's bucket after this long without access
    pub idle_ttl_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            read: RateClassConfig {
                burst: 60,
                refill_per_sec: 1.0,
            },
            write: RateClassConfig {
                burst: 6,
                refill_per_sec: 0.1, // one token every 10s
            },
            idle_ttl_secs: 60 * 60,
        }
    }
}

impl LimitsConfig {
    /// Idle TTL as a duration
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

/// Address lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Drop an address's lock after this long without access
    pub idle_ttl_secs: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 2 * 60 * 60,
        }
    }
}

impl LockingConfig {
    /// Idle TTL as a duration
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

/// Leaderboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    /// Refresh on every multiple of this interval (wall-clock aligned)
    pub refresh_interval_secs: u64,

    /// Entries per ranking
    pub size: usize,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            size: 10,
        }
    }
}

impl LeaderboardConfig {
    /// Refresh interval as a duration
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    ///
    /// `IPCOIN_CONFIG` points at a TOML file used as the base; the other variables override it.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = match std::env::var("IPCOIN_CONFIG") {
            Ok(path) => Config::from_file(path)?,
            Err(_) => Config::default(),
        };

        if let Ok(data_dir) = std::env::var("IPCOIN_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(addr) = std::env::var("IPCOIN_GRPC_ADDR") {
            config.grpc_listen_addr = addr;
        }

        if let Ok(addr) = std::env::var("IPCOIN_METRICS_ADDR") {
            config.metrics_listen_addr = addr;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(crate::Error::Config("data_dir must be set".to_string()));
        }

        for (name, class) in [("read", &self.limits.read), ("write", &self.limits.write)] {
            if class.burst == 0 {
                return Err(crate::Error::Config(format!(
                    "limits.{}.burst must be positive",
                    name
                )));
            }
            if !(class.refill_per_sec.is_finite() && class.refill_per_sec > 0.0) {
                return Err(crate::Error::Config(format!(
                    "limits.{}.refill_per_sec must be positive",
                    name
                )));
            }
        }

        if self.limits.idle_ttl_secs == 0 || self.locking.idle_ttl_secs == 0 {
            return Err(crate::Error::Config(
                "idle TTLs must be positive".to_string(),
            ));
        }

        if self.leaderboard.refresh_interval_secs == 0 {
            return Err(crate::Error::Config(
                "leaderboard.refresh_interval_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "ipcoin-ledger");
        assert_eq!(config.limits.read.burst, 60);
        assert_eq!(config.limits.write.burst, 6);
        assert_eq!(config.locking.idle_ttl(), Duration::from_secs(7200));
        assert_eq!(config.leaderboard.size, 10);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/var/lib/ipcoin"

            [limits.write]
            burst = 3
            refill_per_sec = 0.5

            [leaderboard]
            size = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/ipcoin"));
        assert_eq!(config.limits.write.burst, 3);
        assert_eq!(config.limits.read.burst, 60);
        assert_eq!(config.leaderboard.size, 5);
        assert_eq!(config.leaderboard.refresh_interval_secs, 60);
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let mut config = Config::default();
        config.limits.write.refill_per_sec = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.leaderboard.refresh_interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
