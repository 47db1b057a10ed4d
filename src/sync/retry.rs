//! Exponential backoff with jitter for store calls.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::store::{StoreError, StoreErrorKind, StoreResult};
use crate::sync::error::SyncError;

/// Fraction of the delay added as random jitter, at most.
const JITTER_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Also retry permission/config failures, sharing the same budget.
    pub retry_permanent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            retry_permanent: false,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_retry_permanent(mut self, retry_permanent: bool) -> Self {
        self.retry_permanent = retry_permanent;
        self
    }

    /// Backoff before retry number `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff plus uniform jitter in `[0, 10%]` of it.
    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        delay + delay.mul_f64(jitter)
    }

    pub fn is_retryable(&self, err: &StoreError) -> bool {
        err.is_transient() || (self.retry_permanent && err.kind == StoreErrorKind::Permanent)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's budget is spent. `on_retry` runs once per retry, before sleeping.
pub fn retry_with_backoff<T, F, R>(
    policy: &RetryPolicy,
    operation: &'static str,
    key: &str,
    mut on_retry: R,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> StoreResult<T>,
    R: FnMut(),
{
    let mut attempt: u32 = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries || !policy.is_retryable(&err) {
                    return Err(SyncError::Remote {
                        operation,
                        attempts: attempt + 1,
                        source: err,
                    });
                }
                let delay = policy.backoff_with_jitter(attempt);
                warn!(
                    key,
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after error: {}",
                    err
                );
                on_retry();
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
