use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};

use super::bucket::Bucket;
use super::error::AggError;
use super::segment_tree::{RangeAgg, SegmentTreeMinMax};
use super::sliding_window::SlidingWindowMinMax;

/// Lazily rebuilt query index over the bucket history.
///
/// `Dirty` after any append or eviction; rebuilt once on the next historical
/// query, so one O(n) rebuild is amortized across bursts of queries between
/// mutations.
#[derive(Debug)]
enum TreeState {
    Dirty,
    Clean(SegmentTreeMinMax),
}

impl TreeState {
    fn ensure(&mut self, buckets: &VecDeque<Bucket>) -> &SegmentTreeMinMax {
        if let TreeState::Dirty = self {
            *self = TreeState::Clean(SegmentTreeMinMax::build(buckets));
        }
        match self {
            TreeState::Clean(tree) => tree,
            TreeState::Dirty => unreachable!("tree rebuilt above"),
        }
    }
}

/// Tick aggregator with clock-aligned bucketed sliding windows.
///
/// The still-open bucket is tracked exactly by a [`SlidingWindowMinMax`];
/// closed buckets are condensed aggregates in a bounded deque, indexed by a
/// segment tree for O(log n) historical range queries. `add` is O(1)
/// amortized.
#[derive(Debug)]
pub struct BucketedSlidingAggregator {
    bucket_span: TimeDelta,
    span_us: i64,
    max_window: Option<usize>,
    buckets: VecDeque<Bucket>,
    active_window: SlidingWindowMinMax,
    current_bucket_start: Option<DateTime<Utc>>,
    tree: TreeState,
}

impl BucketedSlidingAggregator {
    /// `max_window` caps the number of retained condensed buckets
    /// (`None` = unlimited).
    pub fn new(bucket_span: TimeDelta, max_window: Option<usize>) -> Result<Self, AggError> {
        if bucket_span <= TimeDelta::zero() {
            return Err(AggError::NonPositiveSpan(bucket_span));
        }
        let span_us = bucket_span
            .num_microseconds()
            .ok_or(AggError::NonPositiveSpan(bucket_span))?;
        Ok(Self {
            bucket_span,
            span_us,
            max_window,
            buckets: VecDeque::new(),
            // Points within one bucket are at most bucket_span apart, so the
            // active window never expires points of the open bucket.
            active_window: SlidingWindowMinMax::new(bucket_span)?,
            current_bucket_start: None,
            tree: TreeState::Dirty,
        })
    }

    /// Ingests one tick, condensing the active bucket on boundary crossing.
    ///
    /// A timestamp older than anything previously observed is rejected with
    /// `OutOfOrder` before any state changes.
    pub fn add(&mut self, timestamp: DateTime<Utc>, value: f64) -> Result<(), AggError> {
        self.validate_timestamp(timestamp)?;

        let bucket_start = self.align_to_bucket_boundary(timestamp);

        match self.current_bucket_start {
            Some(current) if current != bucket_start => {
                self.condense_active_bucket(current);
                self.current_bucket_start = Some(bucket_start);
            }
            None => self.current_bucket_start = Some(bucket_start),
            Some(_) => {}
        }

        self.active_window.add(timestamp, value)
    }

    /// Min/max/busiest-count over the active bucket plus `num_buckets`
    /// bucket-spans of elapsed time looking back.
    ///
    /// The lookback is time-based, not count-based, so gaps and evicted
    /// spans simply contribute nothing. Fails `EmptyResult` when no data
    /// falls in the window at all.
    pub fn query_min_max(&mut self, num_buckets: usize) -> Result<RangeAgg, AggError> {
        let mut result = self.active_reading();

        if num_buckets > 0 {
            result = result.merge(self.query_historical(num_buckets)?);
        }

        if result.is_neutral() {
            return Err(AggError::EmptyResult);
        }
        Ok(result)
    }

    /// Signed value delta between the earlier and later extreme of the
    /// active bucket: positive = rising, negative = falling.
    ///
    /// Only the open bucket retains per-extreme timestamps, so direction is
    /// undefined for historical ranges.
    pub fn get_active_direction(&self) -> Result<f64, AggError> {
        let (min_ts, min_value) = self.active_window.min_point()?;
        let (max_ts, max_value) = self.active_window.max_point()?;

        if max_ts >= min_ts {
            Ok(max_value - min_value)
        } else {
            Ok(min_value - max_value)
        }
    }

    /// Number of retained condensed buckets; callers use this as a
    /// warm-up gate.
    pub fn buckets_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_span(&self) -> TimeDelta {
        self.bucket_span
    }

    /// Floors a timestamp to its bucket boundary relative to the Unix epoch,
    /// so boundaries are reproducible regardless of when the first tick
    /// arrived.
    pub fn align_to_bucket_boundary(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let offset_us = timestamp.timestamp_micros().rem_euclid(self.span_us);
        timestamp - TimeDelta::microseconds(offset_us)
    }

    fn active_reading(&self) -> RangeAgg {
        match (
            self.active_window.current_min(),
            self.active_window.current_max(),
        ) {
            (Ok(min), Ok(max)) => RangeAgg {
                min,
                max,
                max_count: self.active_window.len() as u64,
            },
            _ => RangeAgg::NEUTRAL,
        }
    }

    fn condense_active_bucket(&mut self, bucket_start: DateTime<Utc>) {
        let bucket_end = bucket_start + self.bucket_span;

        let bucket = match (
            self.active_window.current_min(),
            self.active_window.current_max(),
        ) {
            (Ok(min), Ok(max)) => Bucket::new(
                bucket_start,
                bucket_end,
                min,
                max,
                self.active_window.len() as u64,
            ),
            // Preserves temporal continuity when a bucket was opened but
            // never received a point.
            _ => Bucket::empty(bucket_start, bucket_end),
        };
        self.buckets.push_back(bucket);

        if let Some(max_window) = self.max_window {
            while self.buckets.len() > max_window {
                self.buckets.pop_front();
            }
        }

        self.tree = TreeState::Dirty;
        self.active_window.reset();
    }

    fn query_historical(&mut self, num_buckets: usize) -> Result<RangeAgg, AggError> {
        let Some(current_start) = self.current_bucket_start else {
            return Ok(RangeAgg::NEUTRAL);
        };
        if self.buckets.is_empty() {
            return Ok(RangeAgg::NEUTRAL);
        }

        let lookback_start =
            current_start - TimeDelta::microseconds(self.span_us * num_buckets as i64);
        let left_idx = self
            .buckets
            .partition_point(|bucket| bucket.start < lookback_start);
        if left_idx == self.buckets.len() {
            return Ok(RangeAgg::NEUTRAL);
        }

        let right_idx = self.buckets.len() - 1;
        self.tree.ensure(&self.buckets).query(left_idx, right_idx)
    }

    fn validate_timestamp(&self, timestamp: DateTime<Utc>) -> Result<(), AggError> {
        if let Some(last) = self.buckets.back()
            && timestamp < last.end
        {
            return Err(AggError::OutOfOrder {
                timestamp,
                last_seen: last.end,
            });
        }
        if let Some(last) = self.active_window.last_timestamp()
            && timestamp < last
        {
            return Err(AggError::OutOfOrder {
                timestamp,
                last_seen: last,
            });
        }
        Ok(())
    }
}
