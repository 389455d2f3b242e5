//! Shared types for the metrika agent and server: the metric data model,
//! the wire DTO, the gzip codec and the HMAC body signer.

pub mod codec;
pub mod error;
pub mod secure;
pub mod types;

pub use error::MetricError;
pub use types::{Metric, MetricKind, MetricValue, MetricsDto, Payload, WireMetric};
