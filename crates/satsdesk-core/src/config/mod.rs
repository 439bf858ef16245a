//! Configuration module for satsdesk.
//!
//! Loads typed configuration from `~/.satsdesk/config.json`.
//! All fields use `serde` defaults, so a partial file is always valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub router: RouterConfig,
    pub market: MarketConfig,
}

impl Config {
    /// Load configuration from the default path (`~/.satsdesk/config.json`).
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Get the default config directory path.
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".satsdesk")
    }

    /// Write the default config template to disk.
    pub fn write_default_template() -> anyhow::Result<PathBuf> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = serde_json::json!({
            "router": {
                "enableCaching": true,
                "enableEvents": true,
                "metricsWindow": 100,
                "cache": {
                    "maxSize": 10 * 1024 * 1024,
                    "defaultTtl": 300,
                    "enableMetrics": true,
                    "sweepIntervalSecs": 0
                },
                "errorRateThresholds": {
                    "warning": 0.10,
                    "degraded": 0.25,
                    "unhealthy": 0.50
                }
            },
            "market": {
                "coingeckoUrl": "https://api.coingecko.com/api/v3",
                "mempoolUrl": "https://mempool.space/api",
                "timeoutSecs": 15
            }
        });

        std::fs::write(&path, serde_json::to_string_pretty(&template)?)?;
        Ok(path)
    }
}

// ── Router Configuration ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouterConfig {
    pub enable_caching: bool,
    pub enable_events: bool,
    /// Number of execution records kept for rolling metrics.
    pub metrics_window: usize,
    #[serde(alias = "cacheConfig")]
    pub cache: CacheConfig,
    pub error_rate_thresholds: ErrorRateThresholds,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            enable_events: true,
            metrics_window: 100,
            cache: CacheConfig::default(),
            error_rate_thresholds: ErrorRateThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Budget for the summed size estimates, in bytes.
    pub max_size: usize,
    /// Seconds; `0` means entries without an explicit TTL never expire.
    #[serde(alias = "defaultTTL")]
    pub default_ttl: u64,
    pub enable_metrics: bool,
    /// Seconds between background expiry sweeps; `0` disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl > 0).then(|| Duration::from_secs(self.default_ttl))
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10 * 1024 * 1024,
            default_ttl: 300,
            enable_metrics: true,
            sweep_interval_secs: 0,
        }
    }
}

/// Error-rate cut points used by the router health report.
///
/// Below `warning` the router is healthy, from `warning` up to `unhealthy`
/// it is degraded (with a warning past `degraded`), and at or above
/// `unhealthy` it is unhealthy.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ErrorRateThresholds {
    pub warning: f64,
    pub degraded: f64,
    pub unhealthy: f64,
}

impl Default for ErrorRateThresholds {
    fn default() -> Self {
        Self {
            warning: 0.10,
            degraded: 0.25,
            unhealthy: 0.50,
        }
    }
}

// ── Market Collaborators ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarketConfig {
    pub coingecko_url: String,
    pub mempool_url: String,
    pub timeout_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            coingecko_url: "https://api.coingecko.com/api/v3".into(),
            mempool_url: "https://mempool.space/api".into(),
            timeout_secs: 15,
        }
    }
}
