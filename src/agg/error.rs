use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

/// All errors produced by the aggregation core.
///
/// Every variant is either caller misuse (rejected before any state change)
/// or a legitimate "not enough data yet" signal the scoring engine gates
/// around. Nothing here is fatal to the surrounding process.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggError {
    #[error("window span must be positive, got {0}")]
    NonPositiveSpan(TimeDelta),

    #[error("timestamp {timestamp} precedes last observed {last_seen}")]
    OutOfOrder {
        timestamp: DateTime<Utc>,
        last_seen: DateTime<Utc>,
    },

    #[error("window is empty")]
    EmptyWindow,

    #[error("no data in queried range")]
    EmptyResult,

    #[error("invalid range [{left}, {right}] for tree of {len} buckets")]
    InvalidRange {
        left: usize,
        right: usize,
        len: usize,
    },
}
