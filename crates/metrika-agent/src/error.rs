use crate::retry::{Retriable, RetryError};

/// Errors raised while delivering batches to the server.
///
/// 5xx responses and transport failures are retriable; everything else
/// fails the batch on the first attempt.
///
/// # Examples
///
/// ```
/// use metrika_agent::DeliveryError;
/// use metrika_agent::retry::Retriable;
///
/// assert!(DeliveryError::from_status(200).is_none());
/// assert!(DeliveryError::from_status(503).unwrap().is_retriable());
/// assert!(!DeliveryError::from_status(400).unwrap().is_retriable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// 4xx or any other non-2xx, non-5xx status.
    #[error("server rejected batch with status {0}")]
    Rejected(u16),

    #[error("server failed with status {0}")]
    ServerError(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to encode batch: {0}")]
    Encode(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<DeliveryError>,
    },

    #[error("cancelled after {attempts} attempts: {last}")]
    Cancelled {
        attempts: u32,
        last: Box<DeliveryError>,
    },

    #[error("delivery worker failed: {0}")]
    Worker(String),

    /// Cancellation arrived before the batch was picked up.
    #[error("cancelled before the batch was sent")]
    NotSent,

    #[error("{failed} of {total} batches failed; batch {first_index}: {first}")]
    Incomplete {
        failed: usize,
        total: usize,
        first_index: usize,
        first: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// Maps a response status to an error, `None` for 2xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            500..=599 => Some(DeliveryError::ServerError(status)),
            _ => Some(DeliveryError::Rejected(status)),
        }
    }
}

impl Retriable for DeliveryError {
    fn is_retriable(&self) -> bool {
        matches!(
            self,
            DeliveryError::ServerError(_) | DeliveryError::Transport(_)
        )
    }
}

impl From<RetryError<DeliveryError>> for DeliveryError {
    fn from(err: RetryError<DeliveryError>) -> Self {
        match err {
            RetryError::Permanent { error, .. } => error,
            RetryError::Exhausted { attempts, last } => DeliveryError::Exhausted {
                attempts,
                last: Box::new(last),
            },
            RetryError::Cancelled { attempts, last } => DeliveryError::Cancelled {
                attempts,
                last: Box::new(last),
            },
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}
