use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::schema::StockCategory;

/// Default upstream endpoint for the Grow a Garden push feed.
pub const DEFAULT_FEED_URL: &str = "wss://websocket.joshlei.com/growagarden/";

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - Upstream feed connection settings
// - Console dashboard filters
// - Optional debug configuration
//
// Every field has a default, so an empty object `{}` is a
// valid configuration file.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Upstream feed client settings
    pub feed: FeedConfig,

    /// Console dashboard settings
    pub dashboard: DashboardConfig,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,

    /// Seconds between metric report lines (0 disables the reporter)
    pub metrics_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            dashboard: DashboardConfig::default(),
            debug: None,
            metrics_interval_secs: 60,
        }
    }
}

// ------------------------------------------------------------
// Feed configuration
// ------------------------------------------------------------
//
// Defines how the client talks to the single upstream feed.
//
// Notes:
// - `max_attempts` bounds consecutive failed reconnects before
//   the client gives up until a manual or scheduled refresh.
// - `settle_delay_ms` separates a forced teardown from the
//   next connect so the two never overlap.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    /// WebSocket URL of the upstream feed
    pub url: String,

    /// Consecutive failures tolerated before auto-retry stops
    pub max_attempts: u32,

    /// Backoff parameters for failure-driven reconnects
    pub reconnect: ReconnectConfig,

    /// Clock-aligned forced refresh
    pub refresh: RefreshConfig,

    /// Pause between a forced close and the next connect
    pub settle_delay_ms: u64,

    /// Pause between a foreground resume and the reconnect check
    pub resume_delay_ms: u64,

    /// Log every raw inbound frame at debug level
    pub log_raw_frames: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            max_attempts: 10,
            reconnect: ReconnectConfig::default(),
            refresh: RefreshConfig::default(),
            settle_delay_ms: 100,
            resume_delay_ms: 1_000,
            log_raw_frames: false,
        }
    }
}

impl FeedConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }
}

// ------------------------------------------------------------
// Reconnect configuration
// ------------------------------------------------------------
//
// delay(n) = min(base_delay_ms * growth_factor^n, max_delay_ms)
// where n is the number of consecutive failures so far.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub base_delay_ms: u64,

    /// Multiplier applied per consecutive failure
    pub growth_factor: f64,

    /// Upper bound on any single delay
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            growth_factor: 1.5,
            max_delay_ms: 15_000,
        }
    }
}

// ------------------------------------------------------------
// Refresh configuration
// ------------------------------------------------------------
//
// The client reconnects at every `cadence_secs` wall-clock
// boundary plus `grace_secs`, e.g. hh:00:05, hh:05:05, ...
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RefreshConfig {
    /// Boundary cadence in seconds
    pub cadence_secs: u64,

    /// Offset past each boundary in seconds
    pub grace_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            cadence_secs: 300,
            grace_secs: 5,
        }
    }
}

// ------------------------------------------------------------
// Dashboard configuration
// ------------------------------------------------------------
//
// Filters applied by the console consumer only. The feed
// client itself never filters.
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DashboardConfig {
    /// Case-insensitive substring matched against display names
    pub search: Option<String>,

    /// Categories to show (empty = all)
    pub categories: Vec<StockCategory>,

    /// Also list items with quantity <= 0
    pub show_unavailable: bool,
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
//
// Optional debug flags used during development and testing.
//
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Enables raw WebSocket frame logging
    pub raw: Option<bool>,

    /// Raises the default log filter to `debug`
    pub log: Option<bool>,
}

impl Config {
    pub fn verbose(&self) -> bool {
        self.debug.as_ref().is_some_and(|d| d.log.unwrap_or(false))
    }

    /// Rejects values the feed client cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let feed = &self.feed;

        if !(feed.url.starts_with("ws://") || feed.url.starts_with("wss://")) {
            bail!("feed.url must be a ws:// or wss:// URL, got '{}'", feed.url);
        }
        if feed.max_attempts == 0 {
            bail!("feed.max_attempts must be at least 1");
        }
        if !(feed.reconnect.growth_factor >= 1.0) {
            bail!(
                "feed.reconnect.growth_factor must be >= 1.0, got {}",
                feed.reconnect.growth_factor
            );
        }
        if feed.reconnect.base_delay_ms > feed.reconnect.max_delay_ms {
            bail!("feed.reconnect.base_delay_ms exceeds max_delay_ms");
        }
        if feed.refresh.cadence_secs == 0 {
            bail!("feed.refresh.cadence_secs must be positive");
        }
        if feed.refresh.grace_secs >= feed.refresh.cadence_secs {
            bail!("feed.refresh.grace_secs must be shorter than the cadence");
        }

        Ok(())
    }
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure.
//
// When `required` is false a missing file yields the defaults.
//
pub fn load_config(path: &Path, required: bool) -> anyhow::Result<Config> {
    if !required && !path.exists() {
        log::info!("{} not found, using built-in defaults", path.display());
        return Ok(Config::default());
    }

    let data = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut cfg: Config = serde_json::from_str(&data)
        .with_context(|| format!("parsing {}", path.display()))?;

    if cfg.debug.as_ref().is_some_and(|d| d.raw.unwrap_or(false)) {
        cfg.feed.log_raw_frames = true;
    }

    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.feed.url, DEFAULT_FEED_URL);
        assert_eq!(cfg.feed.max_attempts, 10);
        assert_eq!(cfg.feed.reconnect.base_delay_ms, 1_000);
        assert_eq!(cfg.feed.reconnect.max_delay_ms, 15_000);
        assert_eq!(cfg.feed.refresh.cadence_secs, 300);
        assert_eq!(cfg.feed.refresh.grace_secs, 5);
        assert_eq!(cfg.feed.settle_delay(), Duration::from_millis(100));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"feed":{"refresh":{"cadence_secs":60}},"dashboard":{"categories":["seed_stock"]}}"#,
        )
        .unwrap();
        assert_eq!(cfg.feed.refresh.cadence_secs, 60);
        assert_eq!(cfg.feed.refresh.grace_secs, 5);
        assert_eq!(cfg.feed.reconnect.growth_factor, 1.5);
        assert_eq!(cfg.dashboard.categories, vec![StockCategory::Seed]);
    }

    #[test]
    fn validate_rejects_grace_longer_than_cadence() {
        let mut cfg = Config::default();
        cfg.feed.refresh.cadence_secs = 5;
        cfg.feed.refresh.grace_secs = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_http_url_and_shrinking_backoff() {
        let mut cfg = Config::default();
        cfg.feed.url = "https://example.com".into();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.feed.reconnect.growth_factor = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_optional_file_falls_back() {
        let cfg = load_config(Path::new("definitely/not/here.json"), false).unwrap();
        assert_eq!(cfg.feed.max_attempts, 10);
        assert!(load_config(Path::new("definitely/not/here.json"), true).is_err());
    }
}
