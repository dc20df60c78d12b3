//! The sliding-window metric substrate: time-bucketed atomic counters with
//! lazy reset, shared by every statistic node and the hot-parameter cache.

mod bucket;
mod leap_array;
mod metric;

pub use bucket::MetricBucket;
pub use leap_array::{LeapArray, WindowBucket, WindowSlot};
pub use metric::{ArrayMetric, MetricSnapshot};
