//! Retry strategies
//!
//! A strategy is a pure policy: given the failed attempt number (0-based) and the
//! error, it decides whether another attempt is made and how long to wait first.
//! Strategies hold no state beyond their construction parameters and can be shared
//! freely between concurrent fetches.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::core::error_handling::HlsError;

/// Default base delay for exponential backoff (500ms)
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Maximum delay cap for backoff (30 seconds)
pub const MAX_DELAY_CAP: Duration = Duration::from_secs(30);

/// Default symmetric jitter (±10%)
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

pub trait RetryStrategy: Send + Sync + Debug {
    /// Whether the failure of attempt `attempt` should be followed by another attempt
    fn should_retry(&self, error: &HlsError, attempt: u32) -> bool;

    /// Delay to wait after the failure of attempt `attempt`
    fn delay(&self, attempt: u32) -> Duration;
}

/// Strategy selection, as stored in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryKind {
    Exponential,
    Linear,
    Fixed,
    None,
}

/// `delay = min(max_delay, base * 2^attempt) * (1 ± jitter)`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: MAX_DELAY_CAP,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    fn capped_delay(&self, attempt: u32) -> Duration {
        // 2^attempt saturates instead of overflowing for large attempt numbers
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn should_retry(&self, error: &HlsError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    fn delay(&self, attempt: u32) -> Duration {
        let delay = self.capped_delay(attempt);
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let factor = self.jitter_factor.min(1.0);
        let scale = 1.0 + rand::thread_rng().gen_range(-factor..=factor);
        delay.mul_f64(scale)
    }
}

/// `delay = min(max_delay, step * (attempt + 1))`
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    pub max_attempts: u32,
    pub step: Duration,
    pub max_delay: Duration,
}

impl RetryStrategy for LinearBackoff {
    fn should_retry(&self, error: &HlsError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.step
            .checked_mul(attempt.saturating_add(1))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct FixedDelay {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryStrategy for FixedDelay {
    fn should_retry(&self, error: &HlsError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Every failure is final
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn should_retry(&self, _error: &HlsError, _attempt: u32) -> bool {
        false
    }

    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Build the configured strategy
pub fn build_strategy(
    kind: RetryKind,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
) -> Arc<dyn RetryStrategy> {
    match kind {
        RetryKind::Exponential => {
            Arc::new(ExponentialBackoff::new(max_attempts, base_delay, max_delay))
        }
        RetryKind::Linear => Arc::new(LinearBackoff {
            max_attempts,
            step: base_delay,
            max_delay,
        }),
        RetryKind::Fixed => Arc::new(FixedDelay {
            max_attempts,
            delay: base_delay,
        }),
        RetryKind::None => Arc::new(NoRetry),
    }
}
