//! Bounded, time-bucketed statistics.
//!
//! Everything here is fixed-size: a window is a ring of buckets that are recycled in
//! place as time moves on, never a growing log of events.

mod bucket;
mod leap_array;
mod metric;

pub use bucket::{BucketData, CounterBucket, MetricBucket, MetricEvent};
pub use leap_array::{LeapArray, Retention, Slot};
pub use metric::{ArrayMetric, MetricSnapshot};
