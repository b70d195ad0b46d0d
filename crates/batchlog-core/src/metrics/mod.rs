//! Cache metrics.

mod prometheus;

pub use prometheus::{CacheMetrics, FailureKind, FlushDurationHistogram, DEFAULT_PREFIX};
