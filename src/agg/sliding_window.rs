use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};

use super::error::AggError;

/// One raw sample inside the active window.
///
/// The sequence number gives each point an identity so the candidate deques
/// can tell whether their front is the point being expired, even when several
/// points share a timestamp or value.
#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowPoint {
    seq: u64,
    timestamp: DateTime<Utc>,
    value: f64,
}

/// Exact min/max over a rolling time window in O(1) amortized per update.
///
/// Two monotonic deques hold min/max candidates: each point enqueues once and
/// dequeues at most once, so there is no heap overhead and no lazy-deletion
/// bookkeeping. This relies on timestamps being non-decreasing and a single
/// expiration horizon, both of which `add` enforces.
#[derive(Debug)]
pub struct SlidingWindowMinMax {
    window: TimeDelta,
    next_seq: u64,
    points: VecDeque<WindowPoint>,
    min_candidates: VecDeque<WindowPoint>,
    max_candidates: VecDeque<WindowPoint>,
}

impl SlidingWindowMinMax {
    pub fn new(window: TimeDelta) -> Result<Self, AggError> {
        if window <= TimeDelta::zero() {
            return Err(AggError::NonPositiveSpan(window));
        }
        Ok(Self {
            window,
            next_seq: 0,
            points: VecDeque::new(),
            min_candidates: VecDeque::new(),
            max_candidates: VecDeque::new(),
        })
    }

    /// Appends a point and expires anything older than the window horizon.
    ///
    /// Rejects timestamps earlier than the last added point without touching
    /// any state, so a failed `add` is externally a no-op.
    pub fn add(&mut self, timestamp: DateTime<Utc>, value: f64) -> Result<(), AggError> {
        if let Some(last) = self.points.back()
            && timestamp < last.timestamp
        {
            return Err(AggError::OutOfOrder {
                timestamp,
                last_seen: last.timestamp,
            });
        }

        let point = WindowPoint {
            seq: self.next_seq,
            timestamp,
            value,
        };
        self.next_seq += 1;
        self.points.push_back(point);

        while self
            .min_candidates
            .back()
            .is_some_and(|back| back.value >= value)
        {
            self.min_candidates.pop_back();
        }
        self.min_candidates.push_back(point);

        while self
            .max_candidates
            .back()
            .is_some_and(|back| back.value <= value)
        {
            self.max_candidates.pop_back();
        }
        self.max_candidates.push_back(point);

        self.expire(timestamp);
        Ok(())
    }

    pub fn current_min(&self) -> Result<f64, AggError> {
        self.min_candidates
            .front()
            .map(|p| p.value)
            .ok_or(AggError::EmptyWindow)
    }

    pub fn current_max(&self) -> Result<f64, AggError> {
        self.max_candidates
            .front()
            .map(|p| p.value)
            .ok_or(AggError::EmptyWindow)
    }

    /// Timestamp and value of the current minimum.
    pub fn min_point(&self) -> Result<(DateTime<Utc>, f64), AggError> {
        self.min_candidates
            .front()
            .map(|p| (p.timestamp, p.value))
            .ok_or(AggError::EmptyWindow)
    }

    /// Timestamp and value of the current maximum.
    pub fn max_point(&self) -> Result<(DateTime<Utc>, f64), AggError> {
        self.max_candidates
            .front()
            .map(|p| (p.timestamp, p.value))
            .ok_or(AggError::EmptyWindow)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.back().map(|p| p.timestamp)
    }

    /// Drops all points, keeping the window span.
    pub fn reset(&mut self) {
        self.points.clear();
        self.min_candidates.clear();
        self.max_candidates.clear();
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while let Some(front) = self.points.front() {
            if front.timestamp > cutoff {
                break;
            }
            let expired = *front;
            self.points.pop_front();
            if self
                .min_candidates
                .front()
                .is_some_and(|front| front.seq == expired.seq)
            {
                self.min_candidates.pop_front();
            }
            if self
                .max_candidates
                .front()
                .is_some_and(|front| front.seq == expired.seq)
            {
                self.max_candidates.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn min_max_updates_within_window() {
        let mut window = SlidingWindowMinMax::new(TimeDelta::hours(1)).unwrap();
        window.add(base(), 10.0).unwrap();
        window.add(base() + TimeDelta::minutes(10), 5.0).unwrap();
        window.add(base() + TimeDelta::minutes(20), 20.0).unwrap();

        assert_eq!(window.current_min().unwrap(), 5.0);
        assert_eq!(window.current_max().unwrap(), 20.0);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn values_expire_after_window() {
        let mut window = SlidingWindowMinMax::new(TimeDelta::minutes(30)).unwrap();
        window.add(base(), 1.0).unwrap();
        window.add(base() + TimeDelta::minutes(10), 2.0).unwrap();
        // Expires the first two points.
        window.add(base() + TimeDelta::minutes(40), 3.0).unwrap();

        assert_eq!(window.current_min().unwrap(), 3.0);
        assert_eq!(window.current_max().unwrap(), 3.0);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn expiry_is_inclusive_at_the_horizon() {
        let mut window = SlidingWindowMinMax::new(TimeDelta::minutes(30)).unwrap();
        window.add(base(), 1.0).unwrap();
        // Exactly window old: ts <= now - window, so the first point goes.
        window.add(base() + TimeDelta::minutes(30), 2.0).unwrap();

        assert_eq!(window.current_min().unwrap(), 2.0);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn empty_window_errors() {
        let window = SlidingWindowMinMax::new(TimeDelta::minutes(5)).unwrap();
        assert_eq!(window.current_min(), Err(AggError::EmptyWindow));
        assert_eq!(window.current_max(), Err(AggError::EmptyWindow));
        assert_eq!(window.min_point(), Err(AggError::EmptyWindow));
    }

    #[test]
    fn non_positive_window_rejected() {
        assert!(matches!(
            SlidingWindowMinMax::new(TimeDelta::zero()),
            Err(AggError::NonPositiveSpan(_))
        ));
    }

    #[test]
    fn out_of_order_add_is_a_no_op() {
        let mut window = SlidingWindowMinMax::new(TimeDelta::minutes(5)).unwrap();
        window.add(base(), 7.0).unwrap();

        let err = window.add(base() - TimeDelta::seconds(1), 99.0);
        assert!(matches!(err, Err(AggError::OutOfOrder { .. })));

        assert_eq!(window.len(), 1);
        assert_eq!(window.current_min().unwrap(), 7.0);
        assert_eq!(window.current_max().unwrap(), 7.0);
    }

    #[test]
    fn equal_timestamps_are_accepted() {
        let mut window = SlidingWindowMinMax::new(TimeDelta::minutes(5)).unwrap();
        window.add(base(), 3.0).unwrap();
        window.add(base(), 1.0).unwrap();
        window.add(base(), 2.0).unwrap();

        assert_eq!(window.current_min().unwrap(), 1.0);
        assert_eq!(window.current_max().unwrap(), 3.0);
    }

    #[test]
    fn extreme_points_carry_timestamps() {
        let mut window = SlidingWindowMinMax::new(TimeDelta::hours(1)).unwrap();
        window.add(base(), 10.0).unwrap();
        window.add(base() + TimeDelta::seconds(10), 4.0).unwrap();

        let (min_ts, min_v) = window.min_point().unwrap();
        let (max_ts, max_v) = window.max_point().unwrap();
        assert_eq!((min_ts, min_v), (base() + TimeDelta::seconds(10), 4.0));
        assert_eq!((max_ts, max_v), (base(), 10.0));
    }
}
