// src/agg/mod.rs

pub mod aggregator;
pub mod bucket;
pub mod error;
pub mod segment_tree;
pub mod sliding_window;

pub use aggregator::BucketedSlidingAggregator;
pub use bucket::Bucket;
pub use error::AggError;
pub use segment_tree::{RangeAgg, SegmentTreeMinMax};
pub use sliding_window::SlidingWindowMinMax;
