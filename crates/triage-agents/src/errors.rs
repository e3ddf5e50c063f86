//! Workflow error taxonomy with retry classification.
//!
//! Every per-ticket failure is represented here. Callers query
//! `retry_category()` / `is_retriable()` instead of string-matching.
//!
//! | Category     | Retriable | Notes                                        |
//! |--------------|-----------|----------------------------------------------|
//! | Transient    | yes       | network, timeout, throttling                 |
//! | Validation   | yes       | schema- or policy-invalid generator output,  |
//! |              |           | retried with corrective feedback             |
//! | Persistence  | yes       | storage write failure                        |
//! | Fatal        | no        | missing configuration; aborts before any     |
//! |              |           | ticket is processed, never per-ticket        |
//!
//! Exhausting retries is fatal only to that one ticket's execution; the
//! process keeps serving other tickets.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Classification used by the orchestrator to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Transient capability error — retry with exponential backoff.
    Transient,
    /// Output failed structural or policy validation — retry with feedback.
    Validation,
    /// Storage write failed — retry; the workflow is not complete until the
    /// record is durably stored.
    Persistence,
    /// Startup configuration problem — terminal for the process.
    Fatal,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Validation => write!(f, "validation"),
            Self::Persistence => write!(f, "persistence"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Unified error type for workflow steps.
#[derive(Debug, Error)]
pub enum StepError {
    /// External capability call failed (network, 5xx, throttling).
    #[error("capability call failed: {0}")]
    Transient(String),

    /// External capability call exceeded its deadline.
    #[error("capability call timed out after {0:?}")]
    Timeout(Duration),

    /// Generated output failed structural or policy validation.
    #[error("generated response failed validation: {0}")]
    Validation(String),

    /// Storage write failed.
    #[error("storage write failed: {0}")]
    Persistence(String),

    /// Required configuration missing or invalid at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StepError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Transient(_) | Self::Timeout(_) => RetryCategory::Transient,
            Self::Validation(_) => RetryCategory::Validation,
            Self::Persistence(_) => RetryCategory::Persistence,
            Self::Configuration(_) => RetryCategory::Fatal,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }
}

/// Bounded exponential backoff schedule shared by all retried steps.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first try.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before retrying after attempt `attempt` (1-based) failed.
    /// Doubles per attempt: base, 2x base, 4x base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl From<reqwest::Error> for StepError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured deadline here.
            Self::Timeout(Duration::ZERO)
        } else {
            Self::Transient(err.to_string())
        }
    }
}
