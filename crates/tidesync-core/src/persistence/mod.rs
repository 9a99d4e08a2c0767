// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for tidesync-core.
//!
//! The substrate persists workflow instance lifecycle and an append-only
//! event log. Resumption state (cursors, sync tokens) is deliberately not
//! stored here: it belongs to the mirror store owned by the connectors
//! layer, scoped by per-entity workflow identity.

pub mod sqlite;

pub use self::sqlite::SqlitePersistence;

use chrono::{DateTime, Utc};

use crate::error::CoreError;

/// Workflow instance record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstanceRecord {
    /// Deterministic workflow instance ID.
    pub instance_id: String,
    /// Workflow kind (e.g. `workspaceFullSync`).
    pub kind: String,
    /// Current status (pending, running, completed, failed).
    pub status: String,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the instance started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the instance finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message from failure.
    pub error: Option<String>,
}

/// Event record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRecord {
    /// Database primary key (None when inserting new events).
    #[sqlx(default)]
    pub id: Option<i64>,
    /// Instance this event belongs to.
    pub instance_id: String,
    /// Type of event (progress, debounce_flush, child_failed, ...).
    pub event_type: String,
    /// Optional event payload data.
    pub payload: Option<Vec<u8>>,
    /// When the event occurred.
    pub created_at: DateTime<Utc>,
}

/// Persistence abstraction for the substrate.
///
/// Implementations must be safe for concurrent use from many workflow
/// instances; all writes are idempotent upserts or appends.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    /// Register a new workflow instance (status `running`).
    ///
    /// Re-registering an ID after a previous run completed replaces the old
    /// terminal record; the in-memory registry guarantees at most one
    /// *running* instance per ID.
    async fn register_instance(&self, instance_id: &str, kind: &str) -> Result<(), CoreError>;

    /// Fetch an instance record.
    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError>;

    /// Mark an instance finished, with an error message if it failed.
    async fn complete_instance(
        &self,
        instance_id: &str,
        error: Option<&str>,
    ) -> Result<(), CoreError>;

    /// List instances, optionally filtered by status.
    async fn list_instances(
        &self,
        status: Option<&str>,
        limit: i64,
    ) -> Result<Vec<InstanceRecord>, CoreError>;

    /// Append an event to the instance's event log.
    async fn insert_event(&self, event: &EventRecord) -> Result<(), CoreError>;

    /// List events for an instance, optionally filtered by event type.
    async fn list_events(
        &self,
        instance_id: &str,
        event_type: Option<&str>,
    ) -> Result<Vec<EventRecord>, CoreError>;

    /// Verify database connectivity.
    async fn health_check_db(&self) -> Result<bool, CoreError>;
}
