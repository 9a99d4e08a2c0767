// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for tidesync-core.
//!
//! Three layers of failure are distinguished:
//! - [`CoreError`]: substrate-level faults (registry, persistence, delivery).
//! - [`ActivityError`]: the failure taxonomy activities report to workflows
//!   (transient / permanent / fatal), which drives the retry policy.
//! - [`WorkflowError`]: terminal failure of a workflow run.

use thiserror::Error;

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Substrate errors that can occur while managing workflow instances.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// No running instance exists for the given workflow ID.
    #[error("instance '{instance_id}' not found")]
    InstanceNotFound {
        /// The workflow instance ID that was not found.
        instance_id: String,
    },

    /// Input validation failed.
    #[error("validation error on '{field}': {message}")]
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Signal delivery failed (instance completed while sending).
    #[error("signal delivery to '{instance_id}' failed: {reason}")]
    SignalDeliveryFailed {
        /// The workflow instance ID.
        instance_id: String,
        /// The reason for failure.
        reason: String,
    },

    /// Database operation failed.
    #[error("database error during {operation}: {details}")]
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Serialization/deserialization of a payload failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// Failure taxonomy for activity results.
///
/// Activities return `Result<T, ActivityError>`; the substrate retries
/// [`Transient`](ActivityError::Transient) failures with backoff up to the
/// start-to-close budget and passes everything else straight through for the
/// workflow to branch on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActivityError {
    /// Retryable upstream failure (rate limit, 5xx, timeout).
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Expected, non-retryable outcome (object not found, permission denied).
    /// The workflow decides whether to skip-and-continue or fail.
    #[error("permanent upstream error: {0}")]
    Permanent(String),

    /// Programming/invariant violation. Never retried; fails the run fast.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl ActivityError {
    /// Retryable transient failure.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Expected permanent failure.
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Invariant violation, fail fast.
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Whether the retry policy should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Terminal failure of one workflow run.
///
/// There is no workflow-level automatic retry: a run that fails stays failed
/// and is reported to the caller's status store.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// An activity exhausted its retry budget or returned a non-retryable error.
    #[error("activity '{name}' failed: {source}")]
    Activity {
        /// Activity name for operator-visible reporting.
        name: String,
        /// The underlying activity failure.
        #[source]
        source: ActivityError,
    },

    /// An activity attempt exceeded its start-to-close timeout.
    #[error("activity '{name}' timed out after {budget_secs}s")]
    ActivityTimeout {
        /// Activity name.
        name: String,
        /// The exhausted start-to-close budget in seconds.
        budget_secs: u64,
    },

    /// A child workflow failed.
    #[error("child workflow '{instance_id}' failed: {reason}")]
    ChildFailed {
        /// The child workflow instance ID.
        instance_id: String,
        /// The child's terminal error.
        reason: String,
    },

    /// Workflow logic error (invariant broken mid-run). Not retried.
    #[error("workflow logic error: {0}")]
    Logic(String),
}

impl WorkflowError {
    /// Logic error helper.
    pub fn logic(msg: impl Into<String>) -> Self {
        Self::Logic(msg.into())
    }
}
