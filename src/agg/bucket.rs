use chrono::{DateTime, Utc};

/// Aggregate for one fixed-span, clock-aligned time interval.
///
/// Condensed from the active window when a bucket boundary is crossed and
/// immutable thereafter. An empty bucket keeps the neutral extremes
/// (`+inf`, `-inf`) so it never influences a merged range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    /// Exclusive end of the interval, `start + bucket_span`.
    pub end: DateTime<Utc>,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

impl Bucket {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        min: f64,
        max: f64,
        count: u64,
    ) -> Self {
        Self {
            start,
            end,
            min,
            max,
            count,
        }
    }

    /// Bucket covering a span during which no points arrived.
    pub fn empty(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
