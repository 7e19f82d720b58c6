//! Retry utilities with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::pipeline::CancellationSignal;

/// Upper bound of the random extra delay, as a fraction of the backoff.
pub const JITTER_FRACTION: f64 = 0.2;

/// Whether a failed call is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// Retry behavior for a single batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling applied after jitter.
    pub max_delay: Duration,
    /// Backoff multiplier (delay *= multiplier after each retry).
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Total attempts a batch may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn classify<E: Retryable>(&self, error: &E) -> ErrorClass {
        if error.is_retryable() {
            ErrorClass::Retryable
        } else {
            ErrorClass::Fatal
        }
    }

    /// Delay before retry number `attempt` (0-based), with random jitter.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(0.0..=1.0);
        self.delay_with_jitter(attempt, unit)
    }

    /// Backoff for `attempt` where `jitter_unit` in `[0, 1]` selects how much of
    /// the jitter window is added.
    pub fn delay_with_jitter(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let jitter = base * JITTER_FRACTION * jitter_unit.clamp(0.0, 1.0);
        let capped = (base + jitter).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Retry result indicating what happened.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded.
    Success { value: T, attempts: u32 },
    /// Operation failed for good. `cancelled` is set when retrying stopped
    /// because the cancellation signal fired rather than because the error
    /// was fatal or attempts ran out.
    Failed {
        last_error: E,
        attempts: u32,
        cancelled: bool,
    },
}

impl<T, E> RetryResult<T, E> {
    /// Convert to a Result, discarding retry information.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::Failed { last_error, .. } => Err(last_error),
        }
    }
}

/// Determines if an error is retryable.
pub trait Retryable {
    /// Returns true if the operation should be retried.
    fn is_retryable(&self) -> bool;
}

/// Execute an async operation with exponential backoff retry.
///
/// The cancellation signal is checked between attempts and interrupts a
/// pending backoff sleep; it never interrupts an attempt already running.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    signal: Option<&CancellationSignal>,
    mut operation: F,
) -> RetryResult<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        let error = match operation(attempts).await {
            Ok(value) => return RetryResult::Success { value, attempts },
            Err(error) => error,
        };

        if policy.classify(&error) == ErrorClass::Fatal || attempts >= policy.max_attempts() {
            return RetryResult::Failed {
                last_error: error,
                attempts,
                cancelled: false,
            };
        }

        if signal.is_some_and(CancellationSignal::is_cancelled) {
            return RetryResult::Failed {
                last_error: error,
                attempts,
                cancelled: true,
            };
        }

        let delay = policy.next_delay(attempts - 1);
        warn!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retryable failure, backing off"
        );

        match signal {
            Some(signal) => {
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = signal.cancelled() => {
                        return RetryResult::Failed {
                            last_error: error,
                            attempts,
                            cancelled: true,
                        };
                    }
                }
            }
            None => sleep(delay).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct RetryableError(String);

    impl std::fmt::Display for RetryableError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl Retryable for RetryableError {
        fn is_retryable(&self) -> bool {
            self.0.contains("transient")
        }
    }

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries).with_initial_delay(Duration::from_millis(10))
    }

    #[test]
    fn test_delay_grows_exponentially_without_jitter() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_with_jitter(0, 0.0), Duration::from_secs(1));
        assert_eq!(policy.delay_with_jitter(1, 0.0), Duration::from_secs(2));
        assert_eq!(policy.delay_with_jitter(2, 0.0), Duration::from_secs(4));
        assert_eq!(policy.delay_with_jitter(4, 0.0), Duration::from_secs(16));
    }

    #[test]
    fn test_delay_capped_after_jitter() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_with_jitter(5, 0.0), Duration::from_secs(30));
        let near_cap = policy.delay_with_jitter(4, 1.0);
        assert!(near_cap > Duration::from_secs(19) && near_cap < Duration::from_secs(20));
        assert_eq!(policy.delay_with_jitter(40, 1.0), Duration::from_secs(30));
        assert_eq!(policy.delay_with_jitter(u32::MAX, 1.0), Duration::from_secs(30));
    }

    #[test]
    fn test_random_jitter_stays_in_window() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.next_delay(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs_f64(2.4));
        }
    }

    #[test]
    fn test_classify() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.classify(&RetryableError("transient".into())),
            ErrorClass::Retryable
        );
        assert_eq!(
            policy.classify(&RetryableError("permanent".into())),
            ErrorClass::Fatal
        );
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&fast(3), None, |_| async {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, RetryableError>("success")
        })
        .await;

        match result {
            RetryResult::Success { value, attempts } => {
                assert_eq!(value, "success");
                assert_eq!(attempts, 1);
            }
            _ => panic!("expected success"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_retries() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&fast(3), None, |_| async {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                Err(RetryableError("transient error".to_string()))
            } else {
                Ok("success")
            }
        })
        .await;

        assert!(matches!(result, RetryResult::Success { attempts: 3, .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_non_retryable_error() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&fast(3), None, |_| async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(RetryableError("permanent error".to_string()))
        })
        .await;

        match result {
            RetryResult::Failed {
                attempts,
                cancelled,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert!(!cancelled);
            }
            _ => panic!("expected failure"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&fast(3), None, |_| async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(RetryableError("transient error".to_string()))
        })
        .await;

        match result {
            RetryResult::Failed { attempts, .. } => assert_eq!(attempts, 4),
            _ => panic!("expected failure"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retrying() {
        let signal = CancellationSignal::new();
        let counter = AtomicU32::new(0);
        let policy = RetryPolicy::new(5).with_initial_delay(Duration::from_secs(10));

        let canceller = {
            let signal = signal.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                signal.cancel();
            })
        };

        let result = with_retry(&policy, Some(&signal), |_| async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(RetryableError("transient error".to_string()))
        })
        .await;
        canceller.await.unwrap();

        match result {
            RetryResult::Failed {
                last_error,
                attempts,
                cancelled,
            } => {
                assert_eq!(attempts, 1);
                assert!(cancelled);
                assert_eq!(last_error.0, "transient error");
            }
            _ => panic!("expected failure"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_single_attempt() {
        let signal = CancellationSignal::new();
        signal.cancel();

        let result = with_retry(&fast(3), Some(&signal), |_| async {
            Err::<(), _>(RetryableError("transient error".to_string()))
        })
        .await;

        assert!(matches!(
            result,
            RetryResult::Failed {
                attempts: 1,
                cancelled: true,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_into_result_keeps_last_error() {
        let counter = AtomicU32::new(0);
        let result = with_retry(&fast(1), None, |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(RetryableError(format!("transient {attempt}"))) }
        })
        .await
        .into_result();

        assert_eq!(result.unwrap_err().0, "transient 2");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
