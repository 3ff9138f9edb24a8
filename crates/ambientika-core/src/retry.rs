// ── Retry with backoff ──
//
// Exponential backoff with a cap and randomized jitter, applied around
// every remote call of a run. Each attempt is bounded by a timeout; a
// timed-out attempt counts as a failure.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::CoreError;

/// Source of the jitter factor, in `[0.0, 1.0]`.
pub trait JitterSource: Send + Sync {
    fn factor(&self, attempt: u32) -> f64;
}

/// Thread-local RNG jitter.
#[derive(Debug, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn factor(&self, _attempt: u32) -> f64 {
        rand::thread_rng().gen_range(0.0..=1.0)
    }
}

/// Always the same factor. Used in tests.
#[derive(Debug)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn factor(&self, _attempt: u32) -> f64 {
        self.0
    }
}

/// Backoff configuration for remote calls.
#[derive(Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Total attempts, including the first. Always at least one.
    pub max_attempts: u32,
    pub jitter: Arc<dyn JitterSource>,
}

impl fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffPolicy")
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 4,
            jitter: Arc::new(RandomJitter),
        }
    }
}

impl BackoffPolicy {
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// `base * 2^(retry-1)`, capped at `max_delay`, then scaled into
    /// `[delay/2, delay]` by the jitter factor.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::as_conversions
    )]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        // clamped to [0, 1000] so the cast is lossless
        let permille = (self.jitter.factor(retry).clamp(0.0, 1.0) * 1000.0).round() as u32;
        let half = capped / 2;
        half + half.saturating_mul(permille) / 1000
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn retry<T, F, Fut>(
        &self,
        what: &str,
        timeout: Duration,
        mut op: F,
    ) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Timeout {
                    timeout_secs: timeout.as_secs(),
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(what, attempt, ?delay, error = %e, "retrying remote call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(what, attempts, error = %e, "retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}
