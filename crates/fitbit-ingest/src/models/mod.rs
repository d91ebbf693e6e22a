//! Data models for health metrics

pub mod metric;
pub mod record;

pub use metric::MetricKind;
pub use record::{Destination, FlatRecord, MetricValues, TIMESTAMP_FORMAT};
