//! Retry policy configuration for tasks.
//!
//! The default strategy is a fixed delay between attempts. The delay
//! calculation is behind the [`Backoff`] trait so exponential backoff can be
//! substituted without touching the executor.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::task::HandlerError;

/// Strategy for computing the delay before a retry attempt.
pub trait Backoff: Send + Sync {
    /// Delay before the given retry attempt (1-indexed: attempt 1 is the
    /// first retry after the initial failure).
    fn delay(&self, attempt: u32) -> Duration;
}

/// Fixed delay between retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    /// Create a fixed backoff with the given delay.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    /// Create an exponential backoff starting at `base`, capped at `max_delay`.
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self { base, max_delay }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self.base.saturating_mul(1u32 << exp.min(31));
        delay.min(self.max_delay)
    }
}

/// Conditions under which a task should be retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryCondition {
    /// Retry on any error.
    #[default]
    Always,

    /// Retry only on transient errors (timeouts, resource unavailable).
    TransientOnly,

    /// Never retry, regardless of max_retries.
    Never,
}

/// Retry policy for a task.
///
/// Defines how many times a failed task is re-attempted and how long to wait
/// between attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries, not including the initial attempt
    /// (0 = no retries).
    pub max_retries: u32,

    /// Condition for when to retry.
    pub retry_on: RetryCondition,

    /// Delay strategy between retry attempts.
    backoff: Arc<dyn Backoff>,
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_on: RetryCondition::Never,
            backoff: Arc::new(FixedBackoff::new(Duration::ZERO)),
        }
    }

    /// Create a policy with fixed delay retries.
    ///
    /// # Arguments
    /// * `max_retries` - Maximum retry attempts (not including initial try)
    /// * `delay` - Fixed delay between retries
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            retry_on: RetryCondition::Always,
            backoff: Arc::new(FixedBackoff::new(delay)),
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_retries: u32, base: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_on: RetryCondition::Always,
            backoff: Arc::new(ExponentialBackoff::new(base, max_delay)),
        }
    }

    /// Builder: set the retry condition.
    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_on = condition;
        self
    }

    /// Builder: substitute a custom backoff strategy.
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0 && self.retry_on != RetryCondition::Never
    }

    /// Decide whether a failed attempt should be retried.
    ///
    /// # Arguments
    /// * `error` - The error from the failed attempt
    /// * `retry_count` - Number of retries already performed
    pub fn should_retry(&self, error: &HandlerError, retry_count: u32) -> bool {
        if retry_count >= self.max_retries {
            return false;
        }
        match self.retry_on {
            RetryCondition::Always => true,
            RetryCondition::TransientOnly => error.is_transient(),
            RetryCondition::Never => false,
        }
    }

    /// Get the delay before the given retry attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

impl Default for RetryPolicy {
    /// Default policy: no retries.
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("retry_on", &self.retry_on)
            .finish_non_exhaustive()
    }
}
