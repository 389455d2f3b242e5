/// Validation errors raised while turning wire input into metrics.
///
/// These are client mistakes: they map to 4xx responses on the server and
/// are never retried by the agent.
///
/// # Examples
///
/// ```
/// use metrika_common::MetricError;
///
/// let err = MetricError::InvalidKind("histogram".to_string());
/// assert!(err.to_string().contains("histogram"));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    /// The metric id was empty.
    #[error("metric id is required")]
    MissingId,

    /// The kind name is neither `gauge` nor `counter`.
    #[error("invalid metric kind: {0:?}")]
    InvalidKind(String),

    /// The value is missing, unparsable, or does not match the kind.
    #[error("invalid metric value: {0}")]
    InvalidValue(String),

    /// Adding a counter delta would leave the `i64` range.
    #[error("counter overflow: {stored} + {delta}")]
    CounterOverflow { stored: i64, delta: i64 },
}
