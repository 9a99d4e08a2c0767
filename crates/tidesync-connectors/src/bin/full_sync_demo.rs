// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end demo: full sync of a scripted workspace into SQLite.
//!
//! Runs the whole stack except a real provider SDK: SQLite substrate
//! persistence, SQLite mirror store, a scripted source client, and an index
//! that prints what it receives.
//!
//! ```sh
//! cargo run --bin full-sync-demo
//! ```

use std::sync::Arc;

use tidesync_connectors::dispatcher::SyncDispatcher;
use tidesync_connectors::index::{ContentIndex, IndexDocument, IndexError};
use tidesync_connectors::slack::workspace_full_sync_workflow_id;
use tidesync_connectors::source::{
    ContainerInfo, MessagePage, RetryingClient, SourceClient, SourceError, SourceMessage,
    SourceUser,
};
use tidesync_connectors::store::sqlite::SqliteMirrorStore;
use tidesync_connectors::store::{MirrorStore, NewConnector};
use tidesync_core::persistence::SqlitePersistence;
use tidesync_core::{Config, RetryPolicy, SyncRuntime};
use tracing::info;

/// Fixed-script source standing in for a provider SDK.
struct ScriptedClient;

#[async_trait::async_trait]
impl SourceClient for ScriptedClient {
    async fn list_containers(&self, _joined_only: bool) -> Result<Vec<ContainerInfo>, SourceError> {
        Ok(vec![
            ContainerInfo {
                id: "C-general".to_string(),
                name: Some("general".to_string()),
            },
            ContainerInfo {
                id: "C-eng".to_string(),
                name: Some("engineering".to_string()),
            },
        ])
    }

    async fn fetch_container(
        &self,
        container_id: &str,
    ) -> Result<Option<ContainerInfo>, SourceError> {
        Ok(self
            .list_containers(true)
            .await?
            .into_iter()
            .find(|c| c.id == container_id))
    }

    async fn list_page(
        &self,
        container_id: &str,
        _oldest_ts_ms: Option<i64>,
        cursor: Option<&str>,
        _limit: usize,
    ) -> Result<MessagePage, SourceError> {
        if cursor.is_some() {
            return Ok(MessagePage::default());
        }
        let messages = (0..4)
            .map(|i| SourceMessage {
                ts: format!("17000000{i:02}.000100"),
                thread_ts: (i == 3).then(|| "1700000003.000100".to_string()),
                author: "U-ada".to_string(),
                text: format!("message {i} in {container_id}"),
            })
            .collect();
        Ok(MessagePage {
            messages,
            next_cursor: None,
        })
    }

    async fn list_replies(
        &self,
        container_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<SourceMessage>, SourceError> {
        Ok(vec![
            SourceMessage {
                ts: thread_ts.to_string(),
                thread_ts: Some(thread_ts.to_string()),
                author: "U-ada".to_string(),
                text: format!("thread root in {container_id}"),
            },
            SourceMessage {
                ts: "1700000010.000100".to_string(),
                thread_ts: Some(thread_ts.to_string()),
                author: "U-grace".to_string(),
                text: "a reply".to_string(),
            },
        ])
    }

    async fn join_container(&self, container_id: &str) -> Result<(), SourceError> {
        info!(container_id, "joined container");
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<SourceUser>, SourceError> {
        Ok(vec![
            SourceUser {
                id: "U-ada".to_string(),
                display_name: "Ada".to_string(),
            },
            SourceUser {
                id: "U-grace".to_string(),
                display_name: "Grace".to_string(),
            },
        ])
    }
}

/// Index that just prints what the sync produces.
struct PrintingIndex;

#[async_trait::async_trait]
impl ContentIndex for PrintingIndex {
    async fn upsert_document(&self, doc: &IndexDocument) -> Result<(), IndexError> {
        println!("index <- {} ({} bytes) \"{}\"", doc.document_id, doc.content.len(), doc.title);
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), IndexError> {
        println!("index xx {document_id}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let persistence = Arc::new(SqlitePersistence::from_path(&config.core_database_path).await?);
    let store = Arc::new(SqliteMirrorStore::from_path(&config.mirror_database_path).await?);
    let runtime = SyncRuntime::builder()
        .persistence(persistence)
        .retry_policy(RetryPolicy {
            start_to_close: config.activity_timeout,
            ..RetryPolicy::default()
        })
        .build()?;

    let connector_id = store
        .create_connector(&NewConnector {
            provider: "slack".to_string(),
            connection_ref: "demo-connection".to_string(),
            workspace_id: "demo-workspace".to_string(),
            data_source: "demo".to_string(),
        })
        .await?;
    info!(connector_id, "created demo connector");

    let client = Arc::new(RetryingClient::new(Arc::new(ScriptedClient)));
    let dispatcher = SyncDispatcher::new(runtime, client, store.clone(), Arc::new(PrintingIndex));

    dispatcher.start_full_sync(connector_id, None).await?;
    let id = workspace_full_sync_workflow_id(connector_id, None);
    // The instance deregisters itself on completion, so a fast run may be
    // gone before we get to wait on it.
    if let Ok(result) = dispatcher.runtime().wait_for(&id).await {
        result.map_err(|reason| anyhow::anyhow!("full sync failed: {reason}"))?;
    }

    let connector = store
        .get_connector(connector_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("connector vanished"))?;
    println!(
        "sync finished: status={:?} progress={:?}",
        connector.last_sync_status, connector.sync_progress
    );

    dispatcher.runtime().shutdown().await;
    Ok(())
}
