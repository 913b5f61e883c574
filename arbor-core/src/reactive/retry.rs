//! Retry Policy
//!
//! Pure backoff computation for failed activations. After the k-th
//! consecutive failure a retry is allowed while `k < times`, and waits
//! `min(delay * factor, max_delay)` where the factor is `1` for constant
//! backoff and `2^k` for exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Constant,
    #[default]
    Exponential,
}

/// Retry configuration for a computed or linked node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    /// Base delay before the first retry.
    pub delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Total number of attempts, counting the first. `None` retries forever.
    pub times: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Exponential,
            delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            times: Some(3),
        }
    }
}

impl RetryPolicy {
    /// Constant backoff with `times` attempts.
    pub fn constant(delay: Duration, times: u32) -> Self {
        Self {
            backoff: Backoff::Constant,
            delay,
            times: Some(times),
            ..Self::default()
        }
    }

    /// Exponential backoff with `times` attempts.
    pub fn exponential(delay: Duration, times: u32) -> Self {
        Self {
            backoff: Backoff::Exponential,
            delay,
            times: Some(times),
            ..Self::default()
        }
    }

    /// Retry forever.
    pub fn infinite(mut self) -> Self {
        self.times = None;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before the next attempt, given the number of consecutive
    /// failures so far. `None` means give up.
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        if failures == 0 {
            return Some(Duration::ZERO);
        }
        if let Some(times) = self.times {
            if failures >= times {
                return None;
            }
        }

        let delay = match self.backoff {
            Backoff::Constant => self.delay,
            Backoff::Exponential => {
                let factor = 2_u32.checked_pow(failures).unwrap_or(u32::MAX);
                self.delay.checked_mul(factor).unwrap_or(self.max_delay)
            }
        };
        Some(delay.min(self.max_delay))
    }
}
