//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::CoreError;

use super::{EventRecord, InstanceRecord, Persistence};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    ///
    /// The caller is responsible for running migrations.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file if missing, connects
    /// with sensible defaults, and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn register_instance(&self, instance_id: &str, kind: &str) -> Result<(), CoreError> {
        // A completed run with the same deterministic ID may be re-run; the
        // in-memory registry is what enforces single *running* occupancy.
        sqlx::query(
            r#"
            INSERT INTO instances (instance_id, kind, status, created_at, started_at)
            VALUES (?, ?, 'running', CURRENT_TIMESTAMP, ?)
            ON CONFLICT(instance_id) DO UPDATE SET
                kind = excluded.kind,
                status = 'running',
                started_at = excluded.started_at,
                finished_at = NULL,
                error = NULL
            "#,
        )
        .bind(instance_id)
        .bind(kind)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError> {
        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT instance_id, kind, status, created_at, started_at, finished_at, error
            FROM instances
            WHERE instance_id = ?
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn complete_instance(
        &self,
        instance_id: &str,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        let status = if error.is_some() { "failed" } else { "completed" };
        sqlx::query(
            r#"
            UPDATE instances
            SET status = ?, finished_at = ?, error = ?
            WHERE instance_id = ?
            "#,
        )
        .bind(status)
        .bind(Utc::now())
        .bind(error)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_instances(
        &self,
        status: Option<&str>,
        limit: i64,
    ) -> Result<Vec<InstanceRecord>, CoreError> {
        let records = match status {
            Some(status) => {
                sqlx::query_as::<_, InstanceRecord>(
                    r#"
                    SELECT instance_id, kind, status, created_at, started_at, finished_at, error
                    FROM instances
                    WHERE status = ?
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, InstanceRecord>(
                    r#"
                    SELECT instance_id, kind, status, created_at, started_at, finished_at, error
                    FROM instances
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }

    async fn insert_event(&self, event: &EventRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO instance_events (instance_id, event_type, payload, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&event.instance_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_events(
        &self,
        instance_id: &str,
        event_type: Option<&str>,
    ) -> Result<Vec<EventRecord>, CoreError> {
        let records = match event_type {
            Some(event_type) => {
                sqlx::query_as::<_, EventRecord>(
                    r#"
                    SELECT id, instance_id, event_type, payload, created_at
                    FROM instance_events
                    WHERE instance_id = ? AND event_type = ?
                    ORDER BY id ASC
                    "#,
                )
                .bind(instance_id)
                .bind(event_type)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, EventRecord>(
                    r#"
                    SELECT id, instance_id, event_type, payload, created_at
                    FROM instance_events
                    WHERE instance_id = ?
                    ORDER BY id ASC
                    "#,
                )
                .bind(instance_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
