//! Retry policy for read-only dispatches
//!
//! Only non-mutating operations are ever retried: a timed-out mutation
//! may already have applied on the remote side, so retrying it could
//! double-apply. Reads are idempotent and get a small bounded budget
//! with a fixed backoff between attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry budget for read-only dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first (0 = never retry)
    pub max_retries: u32,
    /// Fixed pause between attempts, in milliseconds
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 0,
        }
    }

    /// Total number of attempts including the first
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Pause between attempts
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 50,
        }
    }
}
