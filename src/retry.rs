use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::FailureKind;

/// Decides whether a failed attempt is retried and how long to wait first.
///
/// `attempt` is the number of attempts already made for the item (1 after
/// the first failure).
pub trait RetryPolicy: Send + Sync + 'static {
    fn should_retry(&self, attempt: u32, max_attempts: u32, err: &anyhow::Error) -> bool;

    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff: `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
///
/// Retries any error except [`Permanent`](crate::Permanent) ones while
/// attempts remain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.retry_base_delay(), config.retry_max_delay())
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32, max_attempts: u32, err: &anyhow::Error) -> bool {
        attempt < max_attempts && FailureKind::of(err) == FailureKind::Transient
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
