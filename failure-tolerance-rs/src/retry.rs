//! # Retry Policy
//!
//! Exponential backoff with optional jitter, and the retry eligibility rule
//! used by the executor between attempts.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::ErrorCategory;

/// Configuration for a retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one, at least 1
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "shared_types_rs::serde_secs")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay, before jitter
    #[serde(with = "shared_types_rs::serde_secs")]
    pub max_delay: Duration,

    pub exponential_base: f64,

    /// Scale each delay by a random factor in [0.5, 1.5)
    pub jitter: bool,

    pub retryable_categories: HashSet<ErrorCategory>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            retryable_categories: ErrorCategory::DEFAULT_RETRYABLE.into_iter().collect(),
        }
    }
}

impl RetryConfig {
    /// Default retryable set with custom attempt count and delay bounds
    pub fn with_bounds(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Decides whether and when to retry
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: Option<RetryConfig>) -> Self {
        let mut config = config.unwrap_or_default();
        config.max_attempts = config.max_attempts.max(1);
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// False once `attempt` reaches the attempt limit, otherwise whether the
    /// category is in the retryable set
    pub fn should_retry(&self, category: ErrorCategory, attempt: u32) -> bool {
        if attempt >= self.config.max_attempts {
            return false;
        }
        self.config.retryable_categories.contains(&category)
    }

    /// Delay to wait before `attempt`. Attempt 0 never waits.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let initial = self.config.initial_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();
        let raw = initial * self.config.exponential_base.powi(exponent);
        // powi overflows to inf for large exponents; min() keeps it bounded
        let capped = if raw.is_finite() { raw.min(max) } else { max };

        let seconds = if self.config.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            capped
        };

        Duration::from_secs_f64(seconds.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetryPolicy(max_attempts={}, initial={:?}, max={:?})",
            self.config.max_attempts, self.config.initial_delay, self.config.max_delay
        )
    }
}
