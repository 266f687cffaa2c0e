//! Retry and dead-letter policy.
//!
//! A stateless decision function plus an exponential backoff schedule. The
//! [`Consumer`](crate::Consumer) applies it around each routing attempt.

use courier_core::{Envelope, ExceptionInfo, RouteError, headers};
use std::time::Duration;

/// Backoff and attempt limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    ///
    /// `max_attempts` counts every invocation, the first one included, and is
    /// clamped to at least one. A multiplier below `1.0` is treated as `1.0`.
    pub fn new(
        max_attempts: u32,
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval,
            multiplier: if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 },
            max_interval,
        }
    }

    /// A policy that dead-letters after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Total invocations allowed per delivery.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retrying after failed attempt `attempt` (1-based).
    ///
    /// `initial * multiplier^(attempt - 1)`, capped at the max interval.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_interval.as_millis() as f64 * self.multiplier.powi(exponent);
        let cap = self.max_interval.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            self.max_interval
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// What to do after failed attempt `attempt` (1-based).
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt < self.max_attempts {
            RetryDecision::Retry {
                delay: self.backoff(attempt),
            }
        } else {
            RetryDecision::DeadLetter
        }
    }
}

/// The outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry {
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// Give up and dead-letter the message.
    DeadLetter,
}

/// Where exhausted messages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterTarget {
    /// Dead-letter exchange.
    pub exchange: String,
    /// Dead-letter routing key.
    pub routing_key: String,
}

impl DeadLetterTarget {
    /// Create a target.
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// Why the last attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCause {
    /// Stable root-cause kind.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&RouteError> for FailureCause {
    fn from(err: &RouteError) -> Self {
        let mut root: Option<&(dyn std::error::Error + 'static)> = None;
        let mut next = std::error::Error::source(err);
        while let Some(source) = next {
            root = Some(source);
            next = source.source();
        }
        let message = match root {
            Some(root) => format!("{err}: {root}"),
            None => err.to_string(),
        };
        Self {
            kind: err.root_cause_kind().to_string(),
            message,
        }
    }
}

impl From<&ExceptionInfo> for FailureCause {
    fn from(info: &ExceptionInfo) -> Self {
        Self {
            kind: info.root_cause_kind.clone(),
            message: info.message.clone(),
        }
    }
}

/// Copy `original` for the dead-letter destination.
///
/// Headers and body are kept as they were; only the diagnostic headers are
/// added.
pub fn dead_letter_envelope(original: &Envelope, cause: &FailureCause) -> Envelope {
    original
        .clone()
        .with_header(headers::EXCEPTION_ROOT_CAUSE, cause.kind.as_str())
        .with_header(headers::EXCEPTION_MESSAGE, cause.message.as_str())
        .with_header(headers::FAILED_AT, headers::timestamp_now())
}
