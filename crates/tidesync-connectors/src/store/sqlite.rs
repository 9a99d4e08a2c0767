//! SQLite-backed mirror store implementation.

use std::path::Path;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::source::SourceUser;

use super::{
    ConnectorRecord, MirrorStore, NewConnector, ResourceFilter, ResourceRecord, StoreError,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed mirror store.
#[derive(Clone)]
pub struct SqliteMirrorStore {
    pool: SqlitePool,
}

impl SqliteMirrorStore {
    /// Create a new mirror store from an existing pool.
    ///
    /// The caller is responsible for running migrations and enabling
    /// foreign keys.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a mirror store from a file path.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(format!("create_dir {:?}: {}", parent, e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            // Cascading connector deletion relies on foreign keys.
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(format!("connect {:?}: {}", path, e)))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(format!("migrate: {}", e)))?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl MirrorStore for SqliteMirrorStore {
    async fn create_connector(&self, new: &NewConnector) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO connectors (provider, connection_ref, workspace_id, data_source, status)
            VALUES (?, ?, ?, ?, 'active')
            "#,
        )
        .bind(&new.provider)
        .bind(&new.connection_ref)
        .bind(&new.workspace_id)
        .bind(&new.data_source)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_connector(
        &self,
        connector_id: i64,
    ) -> Result<Option<ConnectorRecord>, StoreError> {
        let record = sqlx::query_as::<_, ConnectorRecord>(
            r#"
            SELECT id, provider, connection_ref, workspace_id, data_source, status,
                   last_sync_status, last_sync_reason, sync_progress, created_at, updated_at
            FROM connectors
            WHERE id = ?
            "#,
        )
        .bind(connector_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete_connector(&self, connector_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM connectors WHERE id = ?")
            .bind(connector_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ConnectorNotFound(connector_id));
        }
        Ok(())
    }

    async fn upsert_resource(&self, record: &ResourceRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO synced_resources
                (connector_id, external_id, parent_id, title, resource_type,
                 updated_ts, permission, document_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(connector_id, external_id) DO UPDATE SET
                parent_id = excluded.parent_id,
                title = excluded.title,
                resource_type = excluded.resource_type,
                updated_ts = excluded.updated_ts,
                permission = excluded.permission,
                document_id = excluded.document_id
            "#,
        )
        .bind(record.connector_id)
        .bind(&record.external_id)
        .bind(&record.parent_id)
        .bind(&record.title)
        .bind(&record.resource_type)
        .bind(record.updated_ts)
        .bind(&record.permission)
        .bind(&record.document_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_resources(&self, connector_id: i64, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "DELETE FROM synced_resources \
             WHERE connector_id = ? AND (external_id IN ({placeholders}) \
                OR parent_id IN ({placeholders}))"
        );

        let mut query = sqlx::query(&sql).bind(connector_id);
        for id in ids {
            query = query.bind(id);
        }
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;

        Ok(())
    }

    async fn list_resources(
        &self,
        connector_id: i64,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceRecord>, StoreError> {
        let mut sql = String::from(
            "SELECT connector_id, external_id, parent_id, title, resource_type, \
                    updated_ts, permission, document_id \
             FROM synced_resources WHERE connector_id = ?",
        );
        if filter.kind.is_some() {
            sql.push_str(" AND resource_type = ?");
        }
        if filter.parent_id.is_some() {
            sql.push_str(" AND parent_id = ?");
        }
        sql.push_str(" ORDER BY external_id ASC");

        let mut query = sqlx::query_as::<_, ResourceRecord>(&sql).bind(connector_id);
        if let Some(kind) = filter.kind {
            query = query.bind(kind.as_str());
        }
        if let Some(parent_id) = &filter.parent_id {
            query = query.bind(parent_id);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn get_cursor(
        &self,
        connector_id: i64,
        stream_key: &str,
    ) -> Result<Option<String>, StoreError> {
        let token: Option<(String,)> = sqlx::query_as(
            "SELECT token FROM sync_cursors WHERE connector_id = ? AND stream_key = ?",
        )
        .bind(connector_id)
        .bind(stream_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token.map(|(t,)| t))
    }

    async fn set_cursor(
        &self,
        connector_id: i64,
        stream_key: &str,
        token: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (connector_id, stream_key, token, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(connector_id, stream_key) DO UPDATE SET
                token = excluded.token,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(connector_id)
        .bind(stream_key)
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_cursor(&self, connector_id: i64, stream_key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sync_cursors WHERE connector_id = ? AND stream_key = ?")
            .bind(connector_id)
            .bind(stream_key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_sync_success(&self, connector_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE connectors
            SET last_sync_status = 'success', last_sync_reason = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(connector_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ConnectorNotFound(connector_id));
        }
        Ok(())
    }

    async fn mark_sync_failure(&self, connector_id: i64, reason: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE connectors
            SET last_sync_status = 'failed', last_sync_reason = ?, status = 'error',
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(connector_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ConnectorNotFound(connector_id));
        }
        Ok(())
    }

    async fn report_sync_progress(&self, connector_id: i64, label: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE connectors
            SET sync_progress = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(label)
        .bind(connector_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ConnectorNotFound(connector_id));
        }
        Ok(())
    }

    async fn upsert_users(
        &self,
        connector_id: i64,
        users: &[SourceUser],
    ) -> Result<(), StoreError> {
        for user in users {
            sqlx::query(
                r#"
                INSERT INTO source_users (connector_id, external_id, display_name)
                VALUES (?, ?, ?)
                ON CONFLICT(connector_id, external_id) DO UPDATE SET
                    display_name = excluded.display_name
                "#,
            )
            .bind(connector_id)
            .bind(&user.id)
            .bind(&user.display_name)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }
}
