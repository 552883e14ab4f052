use std::{fmt, future::Future, num::NonZeroUsize, time::Duration};

use kube::Error as KubeError;
use tokio::time::sleep;

/// Bounded retry with exponential backoff, generic over the error type.
pub struct RetryPolicy<E> {
    /// Maximum number of attempts including the first call.
    pub max_attempts: NonZeroUsize,
    /// Initial wait duration before the next retry.
    pub initial_backoff: Duration,
    /// Upper bound for exponential backoff wait.
    pub max_backoff: Duration,
    /// Multiplication factor for exponential backoff.
    pub backoff_multiplier: f64,
    /// Error classifier for retry decisions.
    pub is_retryable: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RetryPolicy<E> {}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    /// Three attempts, 200ms initial backoff doubling up to 2s.
    pub fn new(is_retryable: fn(&E) -> bool) -> Self {
        Self {
            max_attempts: NonZeroUsize::MIN.saturating_add(2),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            is_retryable,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: NonZeroUsize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier.max(1.0);
        self
    }

    pub fn with_retryable(mut self, is_retryable: fn(&E) -> bool) -> Self {
        self.is_retryable = is_retryable;
        self
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.backoff_multiplier.max(1.0))
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy<KubeError> {
    fn default() -> Self {
        Self::new(default_retryable_error)
    }
}

/// Default retry condition for [`kube::Error`].
///
/// For `Api` errors, retries only on transient HTTP status codes (`408`, `429`, `5xx`).
/// Of the remaining errors only transport failures (hyper and the tower
/// service stack, which covers connect errors and timeouts) are retried.
pub fn default_retryable_error(error: &KubeError) -> bool {
    match error {
        KubeError::Api(response) => matches!(response.code, 408 | 429 | 500..=599),
        KubeError::HyperError(_) | KubeError::Service(_) => true,
        _ => false,
    }
}

/// Call `operation` until it succeeds, fails with a non-retryable error or
/// the attempt budget runs out. The last error is returned.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = policy.initial_backoff.min(policy.max_backoff);
    let mut attempts = 0usize;

    loop {
        attempts = attempts.saturating_add(1);
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempts >= policy.max_attempts.get() || !(policy.is_retryable)(&error) {
                    return Err(error);
                }
                sleep(backoff).await;
                backoff = policy.next_backoff(backoff);
            }
        }
    }
}
