// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local mirror store: connector state, sync cursors, mirrored resources.
//!
//! The mirror store is the only shared mutable resource across concurrent
//! activities. Writes are idempotent upserts keyed by
//! `(connector_id, external_id)`; last-write-wins on mutable fields is
//! acceptable because every write is a re-fetch of upstream truth.

pub mod sqlite;

pub use self::sqlite::SqliteMirrorStore;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tidesync_core::ActivityError;

use crate::source::SourceUser;

/// Resource kind in the mirror hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A container (channel).
    Channel,
    /// A single mirrored message.
    Message,
}

impl ResourceKind {
    /// Stable string form stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Channel => "channel",
            ResourceKind::Message => "message",
        }
    }
}

/// Permission state of a mirrored resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// No longer visible; pending garbage collection.
    None,
    /// Read-only mirror.
    Read,
    /// Read and write back.
    ReadWrite,
}

impl Permission {
    /// Stable string form stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::None => "none",
            Permission::Read => "read",
            Permission::ReadWrite => "read_write",
        }
    }
}

/// A configured link between a workspace and an external source.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConnectorRecord {
    /// Primary key.
    pub id: i64,
    /// Provider type (e.g. `slack`).
    pub provider: String,
    /// Reference to the connection credential (token exchange is external).
    pub connection_ref: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Target data source name.
    pub data_source: String,
    /// Lifecycle status (active, paused, error).
    pub status: String,
    /// Outcome of the last finished sync (`success` or `failed`).
    pub last_sync_status: Option<String>,
    /// Human-readable failure reason when the last sync failed.
    pub last_sync_reason: Option<String>,
    /// Last reported initial-sync progress label (e.g. `67%`).
    pub sync_progress: Option<String>,
    /// When the connector was created.
    pub created_at: DateTime<Utc>,
    /// When connector state last changed.
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a connector.
#[derive(Debug, Clone)]
pub struct NewConnector {
    /// Provider type.
    pub provider: String,
    /// Connection credential reference.
    pub connection_ref: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Target data source name.
    pub data_source: String,
}

/// Local mirror record of one externally-sourced object.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ResourceRecord {
    /// Owning connector.
    pub connector_id: i64,
    /// Stable external identifier; unique per connector.
    pub external_id: String,
    /// Container this resource lives in (`None` for top-level containers).
    pub parent_id: Option<String>,
    /// Display title.
    pub title: String,
    /// Resource kind (`channel`, `message`).
    pub resource_type: String,
    /// Last-modified timestamp in epoch milliseconds.
    pub updated_ts: i64,
    /// Permission state (`none`, `read`, `read_write`).
    pub permission: String,
    /// Pointer into the downstream content index, `None` for containers.
    pub document_id: Option<String>,
}

/// Filter for [`MirrorStore::list_resources`].
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    /// Restrict to one resource kind.
    pub kind: Option<ResourceKind>,
    /// Restrict to children of one container.
    pub parent_id: Option<String>,
}

impl ResourceFilter {
    /// All resources of one kind.
    pub fn kind(kind: ResourceKind) -> Self {
        Self {
            kind: Some(kind),
            parent_id: None,
        }
    }

    /// All children of one container.
    pub fn children_of(parent_id: impl Into<String>) -> Self {
        Self {
            kind: None,
            parent_id: Some(parent_id.into()),
        }
    }
}

/// Mirror store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connector row does not exist.
    #[error("connector {0} not found")]
    ConnectorNotFound(i64),

    /// Database operation failed.
    #[error("mirror store database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Database faults are retryable from an activity's point of view; a missing
/// connector is permanent (the connector was deleted under the workflow).
impl From<StoreError> for ActivityError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConnectorNotFound(_) => ActivityError::permanent(err.to_string()),
            StoreError::Database(_) => ActivityError::transient(err.to_string()),
        }
    }
}

/// Persisted state per connector.
#[async_trait::async_trait]
pub trait MirrorStore: Send + Sync {
    /// Create a connector, returning its ID.
    async fn create_connector(&self, new: &NewConnector) -> Result<i64, StoreError>;

    /// Fetch a connector.
    async fn get_connector(&self, connector_id: i64) -> Result<Option<ConnectorRecord>, StoreError>;

    /// Delete a connector and everything scoped to it.
    async fn delete_connector(&self, connector_id: i64) -> Result<(), StoreError>;

    /// Create or update a mirrored resource, keyed `(connector_id, external_id)`.
    async fn upsert_resource(&self, record: &ResourceRecord) -> Result<(), StoreError>;

    /// Delete resources by external ID, including their child rows.
    async fn delete_resources(&self, connector_id: i64, ids: &[String]) -> Result<(), StoreError>;

    /// List mirrored resources matching a filter.
    async fn list_resources(
        &self,
        connector_id: i64,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceRecord>, StoreError>;

    /// Read a resumption token for one sync stream.
    async fn get_cursor(
        &self,
        connector_id: i64,
        stream_key: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Write a resumption token. At most one writer per stream, enforced by
    /// per-entity workflow identity.
    async fn set_cursor(
        &self,
        connector_id: i64,
        stream_key: &str,
        token: &str,
    ) -> Result<(), StoreError>;

    /// Drop a resumption token once a stream is exhausted.
    async fn clear_cursor(&self, connector_id: i64, stream_key: &str) -> Result<(), StoreError>;

    /// Record a successful sync on the connector.
    async fn mark_sync_success(&self, connector_id: i64) -> Result<(), StoreError>;

    /// Record a failed sync and its operator-visible reason.
    async fn mark_sync_failure(&self, connector_id: i64, reason: &str) -> Result<(), StoreError>;

    /// Update the initial-sync progress label.
    async fn report_sync_progress(&self, connector_id: i64, label: &str) -> Result<(), StoreError>;

    /// Upsert the source's user directory.
    async fn upsert_users(
        &self,
        connector_id: i64,
        users: &[SourceUser],
    ) -> Result<(), StoreError>;
}
