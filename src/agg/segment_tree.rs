use std::collections::VecDeque;

use super::bucket::Bucket;
use super::error::AggError;

/// Reduction over a range of buckets: price extremes plus the busiest
/// bucket's tick count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeAgg {
    pub min: f64,
    pub max: f64,
    pub max_count: u64,
}

impl RangeAgg {
    /// Identity element for `merge`.
    pub const NEUTRAL: RangeAgg = RangeAgg {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
        max_count: 0,
    };

    pub fn merge(self, other: RangeAgg) -> RangeAgg {
        RangeAgg {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            max_count: self.max_count.max(other.max_count),
        }
    }

    /// True when no data contributed to this reduction.
    pub fn is_neutral(&self) -> bool {
        self.min == f64::INFINITY && self.max == f64::NEG_INFINITY
    }
}

/// Array-based segment tree for O(log n) range queries over the ordered
/// bucket history.
///
/// Node `i` has children at `2i+1` and `2i+2`; each node stores the
/// `RangeAgg` of its index range. Empty buckets stay at the neutral element,
/// so gaps in the history never distort a query.
#[derive(Debug)]
pub struct SegmentTreeMinMax {
    len: usize,
    nodes: Vec<RangeAgg>,
}

impl SegmentTreeMinMax {
    /// Builds the tree in O(n) from the current bucket history.
    pub fn build(buckets: &VecDeque<Bucket>) -> Self {
        let len = buckets.len();
        if len == 0 {
            return Self {
                len,
                nodes: Vec::new(),
            };
        }

        // 4n is a loose but always sufficient bound for the flat layout.
        let mut nodes = vec![RangeAgg::NEUTRAL; 4 * len];
        Self::build_node(buckets, &mut nodes, 0, 0, len - 1);
        Self { len, nodes }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Range query over bucket indices `[left, right]`, both inclusive.
    ///
    /// The caller derives indices from a binary search over the same bucket
    /// deque this tree was built from, so an out-of-bounds range signals a
    /// desynchronization bug and fails loudly instead of clamping.
    pub fn query(&self, left: usize, right: usize) -> Result<RangeAgg, AggError> {
        if right >= self.len || left > right {
            return Err(AggError::InvalidRange {
                left,
                right,
                len: self.len,
            });
        }
        Ok(self.query_node(0, 0, self.len - 1, left, right))
    }

    fn build_node(
        buckets: &VecDeque<Bucket>,
        nodes: &mut Vec<RangeAgg>,
        node: usize,
        start: usize,
        end: usize,
    ) {
        if start == end {
            let bucket = &buckets[start];
            if !bucket.is_empty() {
                nodes[node] = RangeAgg {
                    min: bucket.min,
                    max: bucket.max,
                    max_count: bucket.count,
                };
            }
            return;
        }

        let mid = (start + end) / 2;
        let (left_child, right_child) = (2 * node + 1, 2 * node + 2);
        Self::build_node(buckets, nodes, left_child, start, mid);
        Self::build_node(buckets, nodes, right_child, mid + 1, end);
        nodes[node] = nodes[left_child].merge(nodes[right_child]);
    }

    fn query_node(
        &self,
        node: usize,
        node_start: usize,
        node_end: usize,
        query_left: usize,
        query_right: usize,
    ) -> RangeAgg {
        // No overlap.
        if query_right < node_start || query_left > node_end {
            return RangeAgg::NEUTRAL;
        }
        // Full containment.
        if query_left <= node_start && node_end <= query_right {
            return self.nodes[node];
        }
        // Partial overlap.
        let mid = (node_start + node_end) / 2;
        let left = self.query_node(2 * node + 1, node_start, mid, query_left, query_right);
        let right = self.query_node(2 * node + 2, mid + 1, node_end, query_left, query_right);
        left.merge(right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn buckets_from(values: &[Option<(f64, f64, u64)>]) -> VecDeque<Bucket> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let span = TimeDelta::minutes(1);
        values
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let start = base + span * i as i32;
                match entry {
                    Some((min, max, count)) => Bucket::new(start, start + span, *min, *max, *count),
                    None => Bucket::empty(start, start + span),
                }
            })
            .collect()
    }

    fn brute_force(buckets: &VecDeque<Bucket>, left: usize, right: usize) -> RangeAgg {
        buckets
            .iter()
            .skip(left)
            .take(right - left + 1)
            .filter(|b| !b.is_empty())
            .fold(RangeAgg::NEUTRAL, |acc, b| {
                acc.merge(RangeAgg {
                    min: b.min,
                    max: b.max,
                    max_count: b.count,
                })
            })
    }

    #[test]
    fn matches_brute_force_over_all_ranges() {
        let buckets = buckets_from(&[
            Some((5.0, 9.0, 3)),
            None,
            Some((2.0, 4.0, 7)),
            Some((6.0, 12.0, 1)),
            None,
            Some((3.0, 3.0, 5)),
            Some((8.0, 15.0, 2)),
        ]);
        let tree = SegmentTreeMinMax::build(&buckets);

        for left in 0..buckets.len() {
            for right in left..buckets.len() {
                let got = tree.query(left, right).unwrap();
                let want = brute_force(&buckets, left, right);
                assert_eq!(got, want, "range [{left}, {right}]");
            }
        }
    }

    #[test]
    fn empty_buckets_stay_neutral() {
        let buckets = buckets_from(&[None, None, None]);
        let tree = SegmentTreeMinMax::build(&buckets);

        let agg = tree.query(0, 2).unwrap();
        assert!(agg.is_neutral());
        assert_eq!(agg.max_count, 0);
    }

    #[test]
    fn single_bucket_query() {
        let buckets = buckets_from(&[Some((1.5, 2.5, 11))]);
        let tree = SegmentTreeMinMax::build(&buckets);

        let agg = tree.query(0, 0).unwrap();
        assert_eq!(agg.min, 1.5);
        assert_eq!(agg.max, 2.5);
        assert_eq!(agg.max_count, 11);
    }

    #[test]
    fn out_of_bounds_range_fails() {
        let buckets = buckets_from(&[Some((1.0, 2.0, 1)), Some((3.0, 4.0, 2))]);
        let tree = SegmentTreeMinMax::build(&buckets);

        assert!(matches!(
            tree.query(0, 2),
            Err(AggError::InvalidRange { right: 2, len: 2, .. })
        ));
        assert!(matches!(
            tree.query(1, 0),
            Err(AggError::InvalidRange { .. })
        ));
    }

    #[test]
    fn merge_takes_extremes_and_busiest_count() {
        let a = RangeAgg {
            min: 1.0,
            max: 5.0,
            max_count: 3,
        };
        let b = RangeAgg {
            min: 2.0,
            max: 9.0,
            max_count: 8,
        };
        let merged = a.merge(b);
        assert_eq!(merged.min, 1.0);
        assert_eq!(merged.max, 9.0);
        assert_eq!(merged.max_count, 8);

        assert_eq!(a.merge(RangeAgg::NEUTRAL), a);
    }
}
