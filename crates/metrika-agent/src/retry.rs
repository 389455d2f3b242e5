//! Linear-backoff retry for batch delivery.
//!
//! The operation runs once plus up to `max_retries` more times. Before retry
//! number `n` (1-based) the caller sleeps `backoff_base * n`, so with the
//! default 2s base the retries wait 2s, 4s and 6s. The wait grows with the
//! attempt index and the first retry is never immediate: a 5xx or a dropped
//! connection right after a failure is likely to repeat. There is no sleep
//! after the last attempt. Errors that report themselves as unretriable end
//! the loop immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Classifies an error as worth another attempt.
pub trait Retriable {
    fn is_retriable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// Total number of attempts, including the first.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base.saturating_mul(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(2000))
    }
}

/// Why a retried operation finally failed.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The error was unretriable; no further attempts were made.
    Permanent { attempts: u32, error: E },
    /// Every attempt failed with a retriable error.
    Exhausted { attempts: u32, last: E },
    /// Cancellation arrived while waiting to retry.
    Cancelled { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent { error, .. } => error,
            RetryError::Exhausted { last, .. } | RetryError::Cancelled { last, .. } => last,
        }
    }
}

/// Runs `op` under `policy`. `op` receives the 0-based attempt index.
///
/// Cancellation is only observed during the backoff sleep; an attempt that
/// has started always runs to completion.
pub async fn retry_with_linear_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retriable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        let attempts = attempt + 1;

        if !error.is_retriable() {
            return Err(RetryError::Permanent { attempts, error });
        }
        if attempt >= policy.max_retries {
            return Err(RetryError::Exhausted {
                attempts,
                last: error,
            });
        }

        attempt += 1;
        let delay = policy.backoff(attempt);
        tracing::warn!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts, last: error });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retriable for TestError {
        fn is_retriable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    async fn fail_first_n(counter: &AtomicU32, n: u32, error: TestError) -> Result<u32, TestError> {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        if call < n {
            Err(error)
        } else {
            Ok(call)
        }
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::new(3, Duration::from_millis(2000));
        assert_eq!(policy.attempts(), 4);
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
        assert_eq!(policy.backoff(3), Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn first_retry_waits_one_base_unit() {
        let seen = std::sync::Mutex::new(Vec::new());
        let start = tokio::time::Instant::now();
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(2, Duration::from_millis(40));
        let _ = retry_with_linear_backoff(policy, &cancel, |_| {
            seen.lock().unwrap().push(start.elapsed());
            async { Err::<(), _>(TestError::Transient) }
        })
        .await;

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[1] >= Duration::from_millis(40), "first retry at {:?}", seen[1]);
        assert!(seen[2] - seen[1] >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn succeeds_on_final_attempt() {
        let counter = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = retry_with_linear_backoff(fast_policy(3), &cancel, |_| {
            fail_first_n(&counter, 3, TestError::Transient)
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn exhausts_after_max_retries_plus_one() {
        let counter = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = retry_with_linear_backoff(fast_policy(3), &cancel, |_| {
            fail_first_n(&counter, 4, TestError::Transient)
        })
        .await;
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 4,
                last: TestError::Transient
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unretriable_error_stops_after_one_attempt() {
        let counter = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = retry_with_linear_backoff(fast_policy(3), &cancel, |_| {
            fail_first_n(&counter, 10, TestError::Fatal)
        })
        .await;
        assert_eq!(
            result,
            Err(RetryError::Permanent {
                attempts: 1,
                error: TestError::Fatal
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_retrying() {
        let counter = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        let result = retry_with_linear_backoff(policy, &cancel, |_| {
            fail_first_n(&counter, 10, TestError::Transient)
        })
        .await;
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_index_is_passed_to_operation() {
        let cancel = CancellationToken::new();
        let seen = std::sync::Mutex::new(Vec::new());
        let _ = retry_with_linear_backoff(fast_policy(2), &cancel, |attempt| {
            seen.lock().unwrap().push(attempt);
            async { Err::<(), _>(TestError::Transient) }
        })
        .await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }
}
