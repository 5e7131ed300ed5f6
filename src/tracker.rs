//! Scoring and escalation engine.
//!
//! One [`SymbolTracker`] per symbol drives a pipeline of
//! (aggregator, cooldown state) per configured timeframe. Each tick feeds the
//! mid-price to every pipeline, converts the active bucket's readings into
//! severity scores, and runs the cooldown/escalation state machine that
//! decides whether an [`Alert`] is novel enough to emit.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::agg::{BucketedSlidingAggregator, RangeAgg};
use crate::config::{NotifierConfig, SymbolSettings, Thresholds};
use crate::models::Tick;
use crate::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("UP"),
            Direction::Down => f.write_str("DOWN"),
        }
    }
}

/// One well-formed alert event, handed to the notification layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub volatility_score: u32,
    pub activity_score: u32,
    pub magnitude: u32,
    pub pip_change: i64,
    pub tick_count: u64,
    pub timestamp: DateTime<Utc>,
}

/// Cooldown/escalation state for one (symbol, timeframe) pipeline.
///
/// The stored scores are the baseline of the last notification. While any
/// score is non-zero the pipeline is cooling; each significant tick postpones
/// the decay, and once a full cooldown passes quietly the baseline steps
/// down by one until the pipeline is idle again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggStates {
    pub volatility_score: u32,
    pub activity_score: u32,
    last_trigger: Option<DateTime<Utc>>,
    pub last_notification: Option<DateTime<Utc>>,
}

impl AggStates {
    pub fn magnitude(&self) -> u32 {
        self.volatility_score * (self.activity_score + 1)
    }

    pub fn is_idle(&self) -> bool {
        self.magnitude() == 0
    }

    /// Resets the cooldown clock; called on every significant reading.
    pub fn trigger(&mut self, now: DateTime<Utc>) {
        self.last_trigger = Some(now);
    }

    /// Decays the baseline by one once a full cooldown elapsed without a
    /// re-trigger. At zero the pipeline returns to idle.
    pub fn stepdown(&mut self, now: DateTime<Utc>, cooldown: TimeDelta) {
        let Some(last) = self.last_trigger else {
            return;
        };
        if now - last < cooldown {
            return;
        }
        self.volatility_score = self.volatility_score.saturating_sub(1);
        self.activity_score = self.activity_score.saturating_sub(1);
        self.last_trigger = if self.is_idle() { None } else { Some(now) };
    }

    /// A new reading gets through iff it strictly exceeds the baseline: the
    /// first alert always passes (idle baseline is zero) and a strictly
    /// higher score is never suppressed by an active cooldown.
    pub fn should_notify(&self, new_magnitude: u32) -> bool {
        new_magnitude > self.magnitude()
    }

    /// Stores the notified scores as the new baseline.
    pub fn update(&mut self, volatility_score: u32, activity_score: u32, now: DateTime<Utc>) {
        self.volatility_score = volatility_score;
        self.activity_score = activity_score;
        self.last_notification = Some(now);
    }
}

/// Stopping rule for the broad score's doubling lookbacks.
pub trait RarityPolicy {
    /// True while `current` still ranks among the most extreme readings of
    /// the lookback whose peak reading is `historical_peak`.
    fn remains_extreme(&self, current: f64, historical_peak: f64) -> bool;
}

/// Default rule: the reading stays extreme while it sits in roughly the top
/// 20% of the historical range, i.e. at or above 80% of the peak.
#[derive(Debug, Clone, Copy)]
pub struct PercentileRarity {
    pub top_fraction: f64,
}

impl Default for PercentileRarity {
    fn default() -> Self {
        Self { top_fraction: 0.8 }
    }
}

impl RarityPolicy for PercentileRarity {
    fn remains_extreme(&self, current: f64, historical_peak: f64) -> bool {
        historical_peak <= 0.0 || current >= self.top_fraction * historical_peak
    }
}

/// Log-scaled immediate severity: how many times the reading doubles past
/// its threshold. Zero below the threshold, and zero until the reading
/// reaches twice the threshold.
fn deep_score(value: f64, threshold: u64) -> u32 {
    if threshold == 0 || value < threshold as f64 {
        return 0;
    }
    (value / threshold as f64).log2().floor().max(0.0) as u32
}

/// Historical rarity: how many doubling lookbacks (1, 2, 4, ... buckets of
/// elapsed time) the current reading survives as comparably extreme. Stops
/// at the first lookback where it no longer is, and at the edge of the
/// retained history.
fn broad_score(
    agg: &mut BucketedSlidingAggregator,
    current: f64,
    peak_of: impl Fn(&RangeAgg) -> f64,
    rarity: &dyn RarityPolicy,
) -> u32 {
    let available = agg.buckets_count();
    let mut score = 0;
    let mut lookback = 1usize;
    while lookback <= available {
        let Ok(hist) = agg.query_min_max(lookback) else {
            break;
        };
        if !rarity.remains_extreme(current, peak_of(&hist)) {
            break;
        }
        score += 1;
        lookback = lookback.saturating_mul(2);
    }
    score
}

struct Pipeline {
    agg: BucketedSlidingAggregator,
    states: AggStates,
}

/// Per-symbol book-keeper of one pipeline per monitored timeframe.
pub struct SymbolTracker {
    symbol: String,
    settings: SymbolSettings,
    rarity: Box<dyn RarityPolicy + Send>,
    pipelines: BTreeMap<Timeframe, Pipeline>,
}

impl SymbolTracker {
    pub fn new(symbol: impl Into<String>, settings: SymbolSettings) -> Self {
        Self::with_rarity(symbol, settings, Box::new(PercentileRarity::default()))
    }

    pub fn with_rarity(
        symbol: impl Into<String>,
        settings: SymbolSettings,
        rarity: Box<dyn RarityPolicy + Send>,
    ) -> Self {
        let mut tracker = Self {
            symbol: symbol.into(),
            settings,
            rarity,
            pipelines: BTreeMap::new(),
        };
        if tracker.settings.thresholds.is_empty() {
            warn!("No thresholds configured for symbol {}", tracker.symbol);
        }
        let timeframes: Vec<Timeframe> = tracker.settings.thresholds.keys().copied().collect();
        for timeframe in timeframes {
            tracker.add_agg(timeframe);
        }
        tracker
    }

    /// Creates the aggregator pipeline for a timeframe; keeps an existing
    /// one untouched.
    pub fn add_agg(&mut self, timeframe: Timeframe) {
        if self.pipelines.contains_key(&timeframe) {
            debug!("Aggregator for {}/{} already exists", self.symbol, timeframe);
            return;
        }
        let retention = self.settings.retention_for(timeframe);
        match BucketedSlidingAggregator::new(timeframe.span(), Some(retention)) {
            Ok(agg) => {
                debug!(
                    "Creating aggregator for {}/{} (retention {} buckets)",
                    self.symbol, timeframe, retention
                );
                self.pipelines.insert(
                    timeframe,
                    Pipeline {
                        agg,
                        states: AggStates::default(),
                    },
                );
            }
            Err(err) => {
                error!(
                    "Failed to create aggregator for {}/{}: {}",
                    self.symbol, timeframe, err
                );
            }
        }
    }

    pub fn remove_agg(&mut self, timeframe: Timeframe) {
        if self.pipelines.remove(&timeframe).is_some() {
            debug!("Removing aggregator for {}/{}", self.symbol, timeframe);
        } else {
            debug!(
                "No aggregator found for {}/{} to remove",
                self.symbol, timeframe
            );
        }
    }

    /// Replaces the settings snapshot and reconciles pipelines with the new
    /// timeframe set, preserving aggregator history for unchanged ones.
    pub fn apply_settings(&mut self, settings: SymbolSettings) {
        self.settings = settings;

        let stale: Vec<Timeframe> = self
            .pipelines
            .keys()
            .filter(|tf| !self.settings.thresholds.contains_key(tf))
            .copied()
            .collect();
        for timeframe in stale {
            self.remove_agg(timeframe);
        }

        let missing: Vec<Timeframe> = self
            .settings
            .thresholds
            .keys()
            .filter(|tf| !self.pipelines.contains_key(tf))
            .copied()
            .collect();
        for timeframe in missing {
            self.add_agg(timeframe);
        }
    }

    /// Feeds one tick to every pipeline and returns the alerts that made it
    /// through scoring and cooldown, in timeframe order.
    pub fn on_tick(&mut self, tick: &Tick) -> Vec<Alert> {
        let mid = tick.mid();
        let now = tick.time;
        let mut alerts = Vec::new();

        for (&timeframe, pipeline) in self.pipelines.iter_mut() {
            if let Err(err) = pipeline.agg.add(now, mid) {
                warn!(
                    "Dropping out-of-order tick for {}/{}: {}",
                    self.symbol, timeframe, err
                );
                continue;
            }

            // Warm-up gate: scores need history to be meaningful.
            if pipeline.agg.buckets_count() < self.settings.min_buckets_calculation {
                continue;
            }
            let Some(&thresholds) = self.settings.thresholds.get(&timeframe) else {
                continue;
            };

            if let Some(alert) = evaluate_pipeline(
                &self.symbol,
                &self.settings,
                self.rarity.as_ref(),
                timeframe,
                thresholds,
                pipeline,
                now,
            ) {
                alerts.push(alert);
            }
        }
        alerts
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.pipelines.keys().copied().collect()
    }

    pub fn aggregator(&self, timeframe: Timeframe) -> Option<&BucketedSlidingAggregator> {
        self.pipelines.get(&timeframe).map(|p| &p.agg)
    }

    pub fn states(&self, timeframe: Timeframe) -> Option<&AggStates> {
        self.pipelines.get(&timeframe).map(|p| &p.states)
    }
}

/// Scores one pipeline against the current active-bucket reading and runs
/// the escalation state machine.
fn evaluate_pipeline(
    symbol: &str,
    settings: &SymbolSettings,
    rarity: &dyn RarityPolicy,
    timeframe: Timeframe,
    thresholds: Thresholds,
    pipeline: &mut Pipeline,
    now: DateTime<Utc>,
) -> Option<Alert> {
    let active = pipeline.agg.query_min_max(0).ok()?;
    let pip_size = settings.pip_size;
    let pip_change = ((active.max - active.min) / pip_size).round() as i64;
    let tick_count = active.max_count;

    let volatility_deep = deep_score(pip_change as f64, thresholds.volatility);
    let activity_deep = deep_score(tick_count as f64, thresholds.activity);

    let volatility_broad = if volatility_deep > 0 {
        broad_score(
            &mut pipeline.agg,
            pip_change as f64,
            |h| (h.max - h.min) / pip_size,
            rarity,
        )
    } else {
        0
    };
    let activity_broad = if activity_deep > 0 {
        broad_score(
            &mut pipeline.agg,
            tick_count as f64,
            |h| h.max_count as f64,
            rarity,
        )
    } else {
        0
    };

    let volatility_score = volatility_deep * volatility_broad;
    let activity_score = activity_deep * activity_broad;
    // The +1 keeps a pure-volatility spike visible with flat activity.
    let magnitude = volatility_score * (activity_score + 1);

    pipeline.states.stepdown(now, settings.cooldown(timeframe));
    if magnitude == 0 {
        return None;
    }
    pipeline.states.trigger(now);
    if !pipeline.states.should_notify(magnitude) {
        return None;
    }

    let direction = match pipeline.agg.get_active_direction() {
        Ok(delta) if delta > 0.0 => Direction::Up,
        Ok(_) => Direction::Down,
        // Without a direction the result is not well-formed; drop it rather
        // than emit a degenerate alert.
        Err(_) => return None,
    };

    pipeline.states.update(volatility_score, activity_score, now);
    Some(Alert {
        symbol: symbol.to_string(),
        timeframe,
        direction,
        volatility_score,
        activity_score,
        magnitude,
        pip_change,
        tick_count,
        timestamp: now,
    })
}

/// Routes ticks to per-symbol trackers and applies configuration snapshots.
///
/// `update_config` is an idempotent reconciliation: trackers and pipelines
/// are created and removed to match the new snapshot exactly, while
/// aggregator history of unchanged (symbol, timeframe) pairs is preserved.
pub struct VolatilityNotifier {
    config: NotifierConfig,
    trackers: HashMap<String, SymbolTracker>,
}

impl VolatilityNotifier {
    pub fn new(config: NotifierConfig) -> Self {
        let mut notifier = Self {
            config: NotifierConfig::default(),
            trackers: HashMap::new(),
        };
        notifier.update_config(config);
        notifier
    }

    pub fn on_tick(&mut self, symbol: &str, tick: &Tick) -> Vec<Alert> {
        match self.trackers.get_mut(symbol) {
            Some(tracker) => tracker.on_tick(tick),
            None => {
                debug!("No tracker configured for symbol {}", symbol);
                Vec::new()
            }
        }
    }

    /// Replaces the whole monitored symbol set with the new config.
    pub fn update_config(&mut self, config: NotifierConfig) {
        self.trackers.retain(|symbol, _| {
            let keep = config.symbols.contains_key(symbol);
            if !keep {
                debug!("Removing tracker for symbol {}", symbol);
            }
            keep
        });

        for symbol in config.symbols.keys() {
            let Some(settings) = config.resolve(symbol) else {
                continue;
            };
            match self.trackers.get_mut(symbol) {
                Some(tracker) => tracker.apply_settings(settings),
                None => {
                    self.trackers
                        .insert(symbol.clone(), SymbolTracker::new(symbol.clone(), settings));
                }
            }
        }

        self.config = config;
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub fn tracker(&self, symbol: &str) -> Option<&SymbolTracker> {
        self.trackers.get(symbol)
    }

    pub fn tracked_symbols(&self) -> Vec<&str> {
        self.trackers.keys().map(String::as_str).collect()
    }
}
