// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Slack sync activities.
//!
//! Activities are the only place that touches the source client, the mirror
//! store, or the content index. Each one is idempotent under at-least-once
//! execution: upserts are keyed by stable external IDs, cursor writes are
//! last-write-wins, and deletes tolerate already-absent rows.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::future;
use tidesync_core::ActivityError;
use tracing::{debug, info};

use crate::index::{ContentIndex, IndexDocument};
use crate::source::{ContainerInfo, SourceClient, SourceMessage};
use crate::store::{MirrorStore, Permission, ResourceFilter, ResourceKind, ResourceRecord};
use crate::utils::{source_ts_to_ms, week_end_ms, week_start_ms};

/// Page size for channel history listings.
pub const MESSAGES_PAGE_SIZE: usize = 100;

/// Maximum number of nested sync calls in flight at once.
pub const MAX_CONCURRENCY_LEVEL: usize = 8;

/// Result of syncing one page of a channel, threaded back by the caller
/// into the next call.
#[derive(Debug, Clone, Default)]
pub struct SyncChannelOutcome {
    /// Cursor for the next page; `None` means the listing is exhausted.
    pub next_cursor: Option<String>,
    /// Week-bucket starts already rendered during this channel run.
    pub weeks_synced: HashSet<i64>,
}

/// Channels that exist in the mirror but no longer upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GarbageCollectionSet {
    /// Channels whose index documents must be purged.
    pub to_delete_from_index: Vec<String>,
    /// Channels whose mirror rows (and child rows) must be removed.
    pub to_delete_from_mirror: Vec<String>,
}

impl GarbageCollectionSet {
    /// Whether there is nothing to collect.
    pub fn is_empty(&self) -> bool {
        self.to_delete_from_index.is_empty() && self.to_delete_from_mirror.is_empty()
    }
}

/// Activity implementations for one connector.
///
/// Cheap to clone; workflows capture a clone per child.
#[derive(Clone)]
pub struct SlackActivities {
    connector_id: i64,
    client: Arc<dyn SourceClient>,
    store: Arc<dyn MirrorStore>,
    index: Arc<dyn ContentIndex>,
}

impl SlackActivities {
    pub fn new(
        connector_id: i64,
        client: Arc<dyn SourceClient>,
        store: Arc<dyn MirrorStore>,
        index: Arc<dyn ContentIndex>,
    ) -> Self {
        Self {
            connector_id,
            client,
            store,
            index,
        }
    }

    /// The connector this instance operates on.
    pub fn connector_id(&self) -> i64 {
        self.connector_id
    }

    /// Pull the full user directory and mirror it.
    pub async fn fetch_users(&self) -> Result<(), ActivityError> {
        let users = self.client.list_users().await?;
        debug!(connector_id = self.connector_id, count = users.len(), "mirroring user directory");
        self.store.upsert_users(self.connector_id, &users).await?;
        Ok(())
    }

    /// List joined channels and mirror each as a channel resource.
    pub async fn get_channels(
        &self,
        joined_only: bool,
    ) -> Result<Vec<ContainerInfo>, ActivityError> {
        let channels = self.client.list_containers(joined_only).await?;
        for channel in &channels {
            self.store.upsert_resource(&self.channel_record(channel)).await?;
        }
        Ok(channels)
    }

    /// Fetch one channel, mirroring it when it still exists upstream.
    pub async fn get_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<ContainerInfo>, ActivityError> {
        let channel = self.client.fetch_container(channel_id).await?;
        if let Some(channel) = &channel {
            self.store.upsert_resource(&self.channel_record(channel)).await?;
        }
        Ok(channel)
    }

    /// Load the resume cursor for a channel, if a prior run left one behind.
    pub async fn load_channel_cursor(
        &self,
        channel_id: &str,
    ) -> Result<Option<String>, ActivityError> {
        Ok(self
            .store
            .get_cursor(self.connector_id, &cursor_stream_key(channel_id))
            .await?)
    }

    /// Ensure the integration is a member of the channel. Idempotent.
    pub async fn join_channel(&self, channel_id: &str) -> Result<(), ActivityError> {
        self.client.join_container(channel_id).await?;
        Ok(())
    }

    /// Sync one page of a channel's history.
    ///
    /// The page is split into thread roots and non-threaded week buckets,
    /// each fanned out in waves of [`MAX_CONCURRENCY_LEVEL`]. Week buckets
    /// already present in `weeks_synced` are skipped: a bucket sync covers
    /// the whole week range, so later pages touching the same week add
    /// nothing. The resume cursor is persisted before returning, which is
    /// what makes a crashed run restartable mid-channel.
    pub async fn sync_channel(
        &self,
        channel_id: &str,
        channel_name: &str,
        from_ts_ms: Option<i64>,
        cursor: Option<String>,
        mut weeks_synced: HashSet<i64>,
    ) -> Result<SyncChannelOutcome, ActivityError> {
        let page = self
            .client
            .list_page(channel_id, from_ts_ms, cursor.as_deref(), MESSAGES_PAGE_SIZE)
            .await?;

        let mut thread_roots: BTreeSet<String> = BTreeSet::new();
        let mut new_weeks: BTreeSet<i64> = BTreeSet::new();
        for message in &page.messages {
            if let Some(thread_ts) = &message.thread_ts {
                thread_roots.insert(thread_ts.clone());
            } else if let Some(ts_ms) = source_ts_to_ms(&message.ts) {
                let week = week_start_ms(ts_ms);
                if !weeks_synced.contains(&week) {
                    new_weeks.insert(week);
                }
            }
        }

        debug!(
            channel_id,
            messages = page.messages.len(),
            threads = thread_roots.len(),
            weeks = new_weeks.len(),
            "syncing channel page"
        );

        let thread_roots: Vec<String> = thread_roots.into_iter().collect();
        for wave in thread_roots.chunks(MAX_CONCURRENCY_LEVEL) {
            let results = future::join_all(
                wave.iter()
                    .map(|thread_ts| self.sync_thread(channel_id, channel_name, thread_ts)),
            )
            .await;
            for result in results {
                result?;
            }
        }

        let new_weeks: Vec<i64> = new_weeks.into_iter().collect();
        for wave in new_weeks.chunks(MAX_CONCURRENCY_LEVEL) {
            let results = future::join_all(wave.iter().map(|&week| {
                self.sync_non_threaded(channel_id, channel_name, week, week_end_ms(week))
            }))
            .await;
            for result in results {
                result?;
            }
        }
        weeks_synced.extend(new_weeks);

        let stream_key = cursor_stream_key(channel_id);
        match &page.next_cursor {
            Some(token) => {
                self.store
                    .set_cursor(self.connector_id, &stream_key, token)
                    .await?;
            }
            None => {
                self.store.clear_cursor(self.connector_id, &stream_key).await?;
            }
        }

        Ok(SyncChannelOutcome {
            next_cursor: page.next_cursor,
            weeks_synced,
        })
    }

    /// Render one thread into a single index document and mirror its
    /// messages.
    pub async fn sync_thread(
        &self,
        channel_id: &str,
        channel_name: &str,
        thread_ts: &str,
    ) -> Result<(), ActivityError> {
        let replies = self.client.list_replies(channel_id, thread_ts).await?;
        if replies.is_empty() {
            return Ok(());
        }

        let document_id = thread_document_id(self.connector_id, channel_id, thread_ts);
        let doc = IndexDocument {
            document_id: document_id.clone(),
            title: format!("Thread in #{channel_name}"),
            content: render_messages(&replies),
            timestamp_ms: newest_ts_ms(&replies),
        };
        self.index.upsert_document(&doc).await?;

        for message in &replies {
            self.store
                .upsert_resource(&self.message_record(channel_id, message, &document_id))
                .await?;
        }
        Ok(())
    }

    /// Render one week bucket of non-threaded messages and mirror them.
    ///
    /// Pages the channel from the bucket start to exhaustion, keeping only
    /// non-threaded messages inside `[start_ts_ms, end_ts_ms)`.
    pub async fn sync_non_threaded(
        &self,
        channel_id: &str,
        channel_name: &str,
        start_ts_ms: i64,
        end_ts_ms: i64,
    ) -> Result<(), ActivityError> {
        let mut messages: Vec<SourceMessage> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .client
                .list_page(
                    channel_id,
                    Some(start_ts_ms),
                    cursor.as_deref(),
                    MESSAGES_PAGE_SIZE,
                )
                .await?;
            for message in page.messages {
                if message.is_threaded() {
                    continue;
                }
                let Some(ts_ms) = source_ts_to_ms(&message.ts) else {
                    continue;
                };
                if ts_ms >= start_ts_ms && ts_ms < end_ts_ms {
                    messages.push(message);
                }
            }
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        if messages.is_empty() {
            return Ok(());
        }

        let document_id = week_document_id(self.connector_id, channel_id, start_ts_ms);
        let doc = IndexDocument {
            document_id: document_id.clone(),
            title: format!("Messages in #{channel_name} (week of {})", week_label(start_ts_ms)),
            content: render_messages(&messages),
            timestamp_ms: newest_ts_ms(&messages),
        };
        self.index.upsert_document(&doc).await?;

        for message in &messages {
            self.store
                .upsert_resource(&self.message_record(channel_id, message, &document_id))
                .await?;
        }
        Ok(())
    }

    /// Compute the channels to garbage collect.
    ///
    /// Both partitions are the mirror's channel set minus the upstream
    /// joined set; they are produced separately because index purge and
    /// mirror deletion run as separate steps.
    pub async fn get_channels_to_garbage_collect(
        &self,
    ) -> Result<GarbageCollectionSet, ActivityError> {
        let upstream: HashSet<String> = self
            .client
            .list_containers(true)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let mirrored = self
            .store
            .list_resources(self.connector_id, &ResourceFilter::kind(ResourceKind::Channel))
            .await?;

        let stale: Vec<String> = mirrored
            .into_iter()
            .map(|r| r.external_id)
            .filter(|id| !upstream.contains(id))
            .collect();

        info!(
            connector_id = self.connector_id,
            stale = stale.len(),
            "computed garbage collection set"
        );
        Ok(GarbageCollectionSet {
            to_delete_from_index: stale.clone(),
            to_delete_from_mirror: stale,
        })
    }

    /// Purge one stale channel's documents from the index.
    pub async fn delete_channel(&self, channel_id: &str) -> Result<(), ActivityError> {
        let children = self
            .store
            .list_resources(self.connector_id, &ResourceFilter::children_of(channel_id))
            .await?;

        let documents: BTreeSet<String> = children
            .into_iter()
            .filter_map(|r| r.document_id)
            .collect();
        for document_id in documents {
            self.index.delete_document(&document_id).await?;
        }
        Ok(())
    }

    /// Remove stale channels (and their child rows) from the mirror in one
    /// batch.
    pub async fn delete_channels_from_mirror(
        &self,
        channel_ids: Vec<String>,
    ) -> Result<(), ActivityError> {
        self.store
            .delete_resources(self.connector_id, &channel_ids)
            .await?;
        Ok(())
    }

    /// Record a successful sync on the connector row.
    pub async fn save_success_sync(&self) -> Result<(), ActivityError> {
        self.store.mark_sync_success(self.connector_id).await?;
        Ok(())
    }

    /// Record a failed sync with an operator-facing reason.
    pub async fn save_failed_sync(&self, reason: &str) -> Result<(), ActivityError> {
        self.store.mark_sync_failure(self.connector_id, reason).await?;
        Ok(())
    }

    /// Publish a coarse progress label for the initial sync.
    pub async fn report_initial_sync_progress(&self, label: &str) -> Result<(), ActivityError> {
        self.store
            .report_sync_progress(self.connector_id, label)
            .await?;
        Ok(())
    }

    fn channel_record(&self, channel: &ContainerInfo) -> ResourceRecord {
        ResourceRecord {
            connector_id: self.connector_id,
            external_id: channel.id.clone(),
            parent_id: None,
            title: channel.name.clone().unwrap_or_default(),
            resource_type: ResourceKind::Channel.as_str().to_string(),
            updated_ts: 0,
            permission: Permission::Read.as_str().to_string(),
            document_id: None,
        }
    }

    fn message_record(
        &self,
        channel_id: &str,
        message: &SourceMessage,
        document_id: &str,
    ) -> ResourceRecord {
        ResourceRecord {
            connector_id: self.connector_id,
            external_id: format!("{channel_id}:{}", message.ts),
            parent_id: Some(channel_id.to_string()),
            title: message.text.chars().take(80).collect(),
            resource_type: ResourceKind::Message.as_str().to_string(),
            updated_ts: source_ts_to_ms(&message.ts).unwrap_or_default(),
            permission: Permission::Read.as_str().to_string(),
            document_id: Some(document_id.to_string()),
        }
    }
}

fn cursor_stream_key(channel_id: &str) -> String {
    format!("channel:{channel_id}")
}

/// Deterministic document ID for one thread.
pub fn thread_document_id(connector_id: i64, channel_id: &str, thread_ts: &str) -> String {
    format!("slack-{connector_id}-{channel_id}-thread-{thread_ts}")
}

/// Deterministic document ID for one non-threaded week bucket.
pub fn week_document_id(connector_id: i64, channel_id: &str, week_start_ms: i64) -> String {
    format!("slack-{connector_id}-{channel_id}-week-{week_start_ms}")
}

fn render_messages(messages: &[SourceMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.author, m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn newest_ts_ms(messages: &[SourceMessage]) -> i64 {
    messages
        .iter()
        .filter_map(|m| source_ts_to_ms(&m.ts))
        .max()
        .unwrap_or_default()
}

fn week_label(week_start_ms: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(week_start_ms) {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => week_start_ms.to_string(),
    }
}
