//! Bounded retry with exponential backoff.
//!
//! One policy type is shared by every call site that talks to a remote
//! collaborator; the attempt budget and the delay curve are data, not code.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 20;
const MAX_MULTIPLIER: f64 = 10.0;

/// Attempt budget and delay curve for retried operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Cap for the exponential backoff.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Backoff multiplier applied after every failed attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that performs exactly one attempt.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based).
    /// Never exceeds `max_backoff`, whatever the attempt number or multiplier.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let multiplier = if self.backoff_multiplier.is_finite() {
            self.backoff_multiplier.max(1.0)
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * multiplier.powi(exponent);
        if secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff)
    }

    /// Rejects policies whose delay curve cannot be computed sensibly.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts > MAX_ATTEMPTS {
            anyhow::bail!("retry.max_attempts must be at most {MAX_ATTEMPTS}, got {}", self.max_attempts);
        }
        if !self.backoff_multiplier.is_finite()
            || !(1.0..=MAX_MULTIPLIER).contains(&self.backoff_multiplier)
        {
            anyhow::bail!(
                "retry.backoff_multiplier must be between 1 and {MAX_MULTIPLIER}, got {}",
                self.backoff_multiplier
            );
        }
        if self.initial_backoff > self.max_backoff {
            anyhow::bail!("retry.initial_backoff must not exceed retry.max_backoff");
        }
        Ok(())
    }

    fn budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `op` until it succeeds or the policy's attempt budget is spent.
///
/// Returns the last error when every attempt failed. `name` only labels
/// log records.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    name: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let budget = policy.budget();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(op = name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= budget => {
                tracing::debug!(op = name, attempt, error = %e, "retry budget exhausted");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::debug!(op = name, attempt, error = %e, ?delay, "attempt failed; backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
