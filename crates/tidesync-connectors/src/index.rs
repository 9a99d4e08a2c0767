// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Downstream content index boundary.
//!
//! Sync and GC activities push rendered documents here; the orchestrator
//! never touches the index directly. The production implementation lives
//! with the excluded API layer, so this crate only defines the seam.

use thiserror::Error;
use tidesync_core::ActivityError;

/// A document rendered from synced messages (one per thread or week bucket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDocument {
    /// Deterministic document identifier.
    pub document_id: String,
    /// Display title.
    pub title: String,
    /// Rendered text content.
    pub content: String,
    /// Epoch-milliseconds timestamp of the newest message in the document.
    pub timestamp_ms: i64,
}

/// Failures from the content index.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    /// The index service is unreachable. Retryable.
    #[error("index unavailable: {0}")]
    Unavailable(String),

    /// Any other index failure.
    #[error("index error: {0}")]
    Other(String),
}

impl From<IndexError> for ActivityError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Unavailable(_) => ActivityError::transient(err.to_string()),
            IndexError::Other(_) => ActivityError::transient(err.to_string()),
        }
    }
}

/// Upsert/delete surface of the downstream document index.
#[async_trait::async_trait]
pub trait ContentIndex: Send + Sync {
    /// Create or replace a document. Idempotent by `document_id`.
    async fn upsert_document(&self, doc: &IndexDocument) -> Result<(), IndexError>;

    /// Delete a document; deleting an absent document is a no-op.
    async fn delete_document(&self, document_id: &str) -> Result<(), IndexError>;
}
