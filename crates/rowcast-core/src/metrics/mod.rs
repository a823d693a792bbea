//! Publish metrics.

mod prometheus;

pub use prometheus::{DeliveryDurationHistogram, ErrorType, PublishMetrics};
