//! Bounded retry with exponential backoff, independent of any transport.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for calls to external services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff base in milliseconds; attempt `n` waits `base * 2^n`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    /// Delay slept before the given zero-based attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Run `operation` until it succeeds or the policy's attempts are used up.
///
/// The closure receives the zero-based attempt number. The last error is
/// returned on exhaustion. A policy with zero attempts still runs once.
pub async fn attempt<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt_number = 0;

    loop {
        let delay = policy.delay_before(attempt_number);
        if !delay.is_zero() {
            debug!("Retrying in {:?} (attempt {}/{})", delay, attempt_number + 1, attempts);
            tokio::time::sleep(delay).await;
        }

        match operation(attempt_number).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt_number + 1 >= attempts => return Err(e),
            Err(e) => {
                warn!("Attempt {}/{} failed: {}", attempt_number + 1, attempts, e);
            }
        }

        attempt_number += 1;
    }
}
