// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry policy for activity execution.

use std::time::Duration;

/// Retry strategy for activity attempts.
///
/// Determines how delay between retry attempts is calculated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// Exponential backoff: delay * 2^(attempt-1), capped at `max_delay`.
    #[default]
    ExponentialBackoff,
}

/// Retry configuration applied to every activity call a workflow issues.
///
/// Transient failures are retried with backoff until the start-to-close
/// budget for the call is exhausted; at that point the failure escalates to
/// a workflow failure. Permanent and fatal errors are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single backoff delay.
    pub max_delay: Duration,
    /// Retry strategy for calculating delays.
    pub strategy: RetryStrategy,
    /// Total budget for one activity call, attempts and backoff included.
    pub start_to_close: Duration,
}

impl RetryPolicy {
    /// Calculate the delay before a given retry attempt (1-indexed).
    ///
    /// Attempt 1 is the first retry, after the initial failure.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = match self.strategy {
            RetryStrategy::ExponentialBackoff => 2u32.saturating_pow(attempt.saturating_sub(1)),
        };
        self.initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: RetryStrategy::default(),
            // Reference start-to-close timeout carried over from the
            // original orchestration: 10 minutes per activity call.
            start_to_close: Duration::from_secs(600),
        }
    }
}
