use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::TimeDelta;
use serde::Deserialize;
use thiserror::Error;

use crate::timeframe::Timeframe;

/// Configuration failures are surfaced at load time and never reach the
/// aggregation core.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Heuristic default retention horizon: a few weeks usually contains a
/// volcanic move to compare against.
const DEFAULT_RETENTION_MINUTES: i64 = 4 * 7 * 24 * 60;

fn default_pip_size() -> f64 {
    0.0001
}

fn default_flush_secs() -> u64 {
    15
}

fn default_feed_endpoint() -> String {
    "wss://fstream.binance.com/stream".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Combined-stream WebSocket endpoint; stream names are derived from the
    /// configured symbols.
    #[serde(default = "default_feed_endpoint")]
    pub endpoint: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_feed_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Seconds between alert batch flushes.
    #[serde(default = "default_flush_secs")]
    pub flush_secs: u64,
    #[serde(default)]
    pub tracker_defaults: TrackerConfig,
    #[serde(default)]
    pub symbols: BTreeMap<String, SymbolConfig>,
}

// Manual impl so an absent `notifier:` section gets the same flush interval
// as an absent `flush_secs` field.
impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            flush_secs: default_flush_secs(),
            tracker_defaults: TrackerConfig::default(),
            symbols: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
    /// Price increment of one pip, used to express ranges as integer pips.
    #[serde(default = "default_pip_size")]
    pub pip_size: f64,
    /// Per-timeframe thresholds; a timeframe missing here is not monitored.
    #[serde(default)]
    pub thresholds: BTreeMap<Timeframe, Thresholds>,
    /// Field-wise overrides of `tracker_defaults`.
    #[serde(default)]
    pub tracker: Option<TrackerConfig>,
}

/// Alert thresholds for one (symbol, timeframe) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Thresholds {
    /// Pip range of the active bucket that counts as unusual movement.
    pub volatility: u64,
    /// Tick count of the active bucket that counts as unusual activity.
    pub activity: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerConfig {
    /// Cooldown length in units of the timeframe span.
    pub cooldown_unit: Option<u32>,
    /// Minimum condensed buckets before scores are computed.
    pub min_buckets_calculation: Option<usize>,
    /// Retained buckets per timeframe. An override replaces the whole map,
    /// it is never merged with the defaults.
    pub num_bucket_retention: Option<BTreeMap<Timeframe, usize>>,
}

/// Resolved, immutable snapshot of everything a [`SymbolTracker`] needs.
///
/// Built once per symbol from the config and handed to the tracker, so the
/// tracker never holds a reference back to the owning configuration.
///
/// [`SymbolTracker`]: crate::tracker::SymbolTracker
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSettings {
    pub pip_size: f64,
    pub thresholds: BTreeMap<Timeframe, Thresholds>,
    pub cooldown_unit: u32,
    pub min_buckets_calculation: usize,
    retention: BTreeMap<Timeframe, usize>,
}

impl SymbolSettings {
    pub fn retention_for(&self, timeframe: Timeframe) -> usize {
        self.retention
            .get(&timeframe)
            .copied()
            .unwrap_or_else(|| default_retention(timeframe))
    }

    pub fn cooldown(&self, timeframe: Timeframe) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.cooldown_unit) * timeframe.seconds())
    }
}

fn default_retention(timeframe: Timeframe) -> usize {
    (DEFAULT_RETENTION_MINUTES / timeframe.minutes()).max(1) as usize
}

impl NotifierConfig {
    /// Resolves the effective settings for one symbol, or `None` when the
    /// symbol is not configured.
    pub fn resolve(&self, symbol: &str) -> Option<SymbolSettings> {
        let symbol_cfg = self.symbols.get(symbol)?;
        let overrides = symbol_cfg.tracker.as_ref();
        let defaults = &self.tracker_defaults;

        let cooldown_unit = overrides
            .and_then(|t| t.cooldown_unit)
            .or(defaults.cooldown_unit)
            .unwrap_or(1);
        let min_buckets_calculation = overrides
            .and_then(|t| t.min_buckets_calculation)
            .or(defaults.min_buckets_calculation)
            .unwrap_or(30);
        let retention = overrides
            .and_then(|t| t.num_bucket_retention.clone())
            .or_else(|| defaults.num_bucket_retention.clone())
            .unwrap_or_default();

        Some(SymbolSettings {
            pip_size: symbol_cfg.pip_size,
            thresholds: symbol_cfg.thresholds.clone(),
            cooldown_unit,
            min_buckets_calculation,
            retention,
        })
    }
}

impl AppConfig {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = serde_yaml::from_str(&yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.is_empty() {
            return Err(ConfigError::Invalid("telegram.bot_token is empty".into()));
        }
        if self.telegram.chat_id.is_empty() {
            return Err(ConfigError::Invalid("telegram.chat_id is empty".into()));
        }
        if self.notifier.flush_secs == 0 {
            return Err(ConfigError::Invalid(
                "notifier.flush_secs must be positive".into(),
            ));
        }

        validate_tracker("tracker_defaults", &self.notifier.tracker_defaults)?;
        for (symbol, cfg) in &self.notifier.symbols {
            if cfg.pip_size <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{symbol}: pip_size must be positive"
                )));
            }
            for (timeframe, thresholds) in &cfg.thresholds {
                if thresholds.volatility == 0 || thresholds.activity == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "{symbol}/{timeframe}: thresholds must be positive"
                    )));
                }
            }
            if let Some(tracker) = &cfg.tracker {
                validate_tracker(symbol, tracker)?;
            }
        }
        Ok(())
    }
}

fn validate_tracker(scope: &str, tracker: &TrackerConfig) -> Result<(), ConfigError> {
    if tracker.cooldown_unit == Some(0) {
        return Err(ConfigError::Invalid(format!(
            "{scope}: cooldown_unit must be positive"
        )));
    }
    if tracker.min_buckets_calculation == Some(0) {
        return Err(ConfigError::Invalid(format!(
            "{scope}: min_buckets_calculation must be positive"
        )));
    }
    if let Some(retention) = &tracker.num_bucket_retention {
        for (timeframe, count) in retention {
            if *count == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{scope}/{timeframe}: num_bucket_retention must be positive"
                )));
            }
        }
    }
    Ok(())
}
