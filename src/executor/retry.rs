//! Bounded exponential backoff for transient provider errors.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::ExecutorConfig;
use crate::error::{ExecutionError, ProviderError};

/// Default maximum attempts, first try included.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default initial backoff delay.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default cap for a single backoff delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Retry policy for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, first try included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay, retry-after hints included.
    pub max_delay: Duration,
}

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// The provider returned a permanent error.
    Permanent(ProviderError),
    /// Transient errors persisted through every attempt.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// The last transient error.
        last: ProviderError,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl From<&ExecutorConfig> for RetryPolicy {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
        }
    }
}

impl RetryError {
    /// Converts into the execution error for `action` on `resource`.
    #[must_use]
    pub fn into_execution_error(self, action: &str, resource: &str) -> ExecutionError {
        match self {
            Self::Permanent(source) => ExecutionError::ActionFailed {
                action: action.to_string(),
                resource: resource.to_string(),
                source,
            },
            Self::Exhausted { attempts, last } => ExecutionError::RetriesExhausted {
                resource: resource.to_string(),
                attempts,
                last,
            },
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff before retry number `retries_used + 1`.
    #[must_use]
    pub fn backoff(&self, retries_used: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let multiplier = 1u128 << retries_used.min(20);
        let millis = base_ms.saturating_mul(multiplier).min(max_ms);
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Delay before the next retry, honoring the provider's hint up to `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retries_used: u32, error: &ProviderError) -> Duration {
        let backoff = self.backoff(retries_used);
        let hinted = error
            .retry_after_secs()
            .map_or(Duration::ZERO, Duration::from_secs);
        backoff.max(hinted).min(self.max_delay.max(self.base_delay))
    }

    /// Runs `call` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// Returns the value and the number of attempts made.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] describing why the call gave up.
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> Result<(T, u32), RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match call().await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if !e.is_transient() => return Err(RetryError::Permanent(e)),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.delay_for(attempt - 1, &error);
            warn!(
                "{label}: attempt {attempt}/{max_attempts} failed ({error}), retrying in {}ms",
                delay.as_millis()
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
