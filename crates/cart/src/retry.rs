//! Bounded retries with exponential backoff for cart API calls.
//!
//! Cart queries retry a couple of times on transient failures; mutations do
//! not retry by default because a replayed add would double the quantity.
//! Client errors (4xx other than 408 and 429) are never retried.

use std::future::Future;
use std::time::Duration;

use crate::api::ApiError;

/// How many times, and how patiently, to retry a cart call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first try.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << attempt.min(31))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Executes `operation`, retrying transient [`ApiError`]s with exponential backoff.
///
/// With `max_retries = 2` the operation is attempted at most 3 times. A
/// rate-limited response waits at least as long as the server's `Retry-After`.
/// Non-retriable errors are returned immediately.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-retriable error.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retriable() || attempt >= policy.max_retries {
            return Err(err);
        }

        let mut delay = policy.delay_for(attempt);
        if let ApiError::RateLimited(secs) = err {
            delay = delay.max(Duration::from_secs(secs));
        }

        tracing::warn!(
            attempt,
            max_retries = policy.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Transient cart API error, retrying after backoff"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
