// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hand-written trait doubles shared by the crate's tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;
use tidesync_core::CoreError;
use tidesync_core::persistence::{EventRecord, InstanceRecord, Persistence};
use tokio::time::Instant;

use crate::index::{ContentIndex, IndexDocument, IndexError};
use crate::source::{
    ContainerInfo, MessagePage, SourceClient, SourceError, SourceMessage, SourceUser,
};
use crate::store::{
    ConnectorRecord, MirrorStore, NewConnector, ResourceFilter, ResourceRecord, StoreError,
};

/// Scripted in-memory source. Paging is offset-based: the cursor is the
/// decimal offset of the next message in the channel's scripted history.
#[derive(Default)]
pub struct FakeSourceClient {
    channels: Mutex<Vec<ContainerInfo>>,
    messages: Mutex<HashMap<String, Vec<SourceMessage>>>,
    replies: Mutex<HashMap<(String, String), Vec<SourceMessage>>>,
    users: Mutex<Vec<SourceUser>>,
    joined: Mutex<HashSet<String>>,
    page_size_overrides: Mutex<HashMap<String, usize>>,
    user_failure: Mutex<Option<SourceError>>,
    reply_delay: Mutex<Option<std::time::Duration>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl FakeSourceClient {
    pub fn add_channel(&self, id: &str, name: Option<&str>) {
        self.channels.lock().unwrap().push(ContainerInfo {
            id: id.to_string(),
            name: name.map(str::to_string),
        });
    }

    pub fn add_message(&self, channel_id: &str, message: SourceMessage) {
        self.messages
            .lock()
            .unwrap()
            .entry(channel_id.to_string())
            .or_default()
            .push(message);
    }

    pub fn add_reply(&self, channel_id: &str, thread_ts: &str, message: SourceMessage) {
        self.replies
            .lock()
            .unwrap()
            .entry((channel_id.to_string(), thread_ts.to_string()))
            .or_default()
            .push(message);
    }

    pub fn add_user(&self, id: &str, display_name: &str) {
        self.users.lock().unwrap().push(SourceUser {
            id: id.to_string(),
            display_name: display_name.to_string(),
        });
    }

    /// Make every `list_replies` call take this long (virtual time under
    /// `tokio::time::pause`), to open mid-sync windows in timing tests.
    pub fn set_reply_delay(&self, delay: std::time::Duration) {
        *self.reply_delay.lock().unwrap() = Some(delay);
    }

    /// Make every `list_users` call fail with this error.
    pub fn fail_users_with(&self, err: SourceError) {
        *self.user_failure.lock().unwrap() = Some(err);
    }

    /// Force smaller pages than the caller's limit for one channel.
    pub fn set_page_size_override(&self, channel_id: &str, size: usize) {
        self.page_size_overrides
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), size);
    }

    /// Channels the integration has joined so far.
    pub fn joined_channels(&self) -> HashSet<String> {
        self.joined.lock().unwrap().clone()
    }

    /// `(method, instant)` log of every call, in virtual time under
    /// `tokio::time::pause`.
    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    /// Instants of calls to one method.
    pub fn call_instants(&self, method: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, at)| *at)
            .collect()
    }

    fn record(&self, method: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), Instant::now()));
    }
}

#[async_trait::async_trait]
impl SourceClient for FakeSourceClient {
    async fn list_containers(&self, _joined_only: bool) -> Result<Vec<ContainerInfo>, SourceError> {
        self.record("list_containers");
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn fetch_container(
        &self,
        container_id: &str,
    ) -> Result<Option<ContainerInfo>, SourceError> {
        self.record("fetch_container");
        Ok(self
            .channels
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == container_id)
            .cloned())
    }

    async fn list_page(
        &self,
        container_id: &str,
        oldest_ts_ms: Option<i64>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<MessagePage, SourceError> {
        self.record("list_page");
        let history: Vec<SourceMessage> = self
            .messages
            .lock()
            .unwrap()
            .get(container_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| match (oldest_ts_ms, crate::utils::source_ts_to_ms(&m.ts)) {
                (Some(oldest), Some(ts_ms)) => ts_ms >= oldest,
                _ => true,
            })
            .collect();

        let offset: usize = match cursor {
            Some(cursor) => cursor
                .parse()
                .map_err(|_| SourceError::Api(format!("bad cursor {cursor:?}")))?,
            None => 0,
        };
        let page_size = self
            .page_size_overrides
            .lock()
            .unwrap()
            .get(container_id)
            .copied()
            .unwrap_or(limit)
            .min(limit);

        let end = (offset + page_size).min(history.len());
        let next_cursor = (end < history.len()).then(|| end.to_string());
        Ok(MessagePage {
            messages: history[offset.min(history.len())..end].to_vec(),
            next_cursor,
        })
    }

    async fn list_replies(
        &self,
        container_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<SourceMessage>, SourceError> {
        self.record("list_replies");
        let delay = *self.reply_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .replies
            .lock()
            .unwrap()
            .get(&(container_id.to_string(), thread_ts.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn join_container(&self, container_id: &str) -> Result<(), SourceError> {
        self.record("join_container");
        self.joined.lock().unwrap().insert(container_id.to_string());
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<SourceUser>, SourceError> {
        self.record("list_users");
        if let Some(err) = self.user_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.users.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct MirrorState {
    connectors: HashMap<i64, ConnectorRecord>,
    resources: BTreeMap<(i64, String), ResourceRecord>,
    cursors: HashMap<(i64, String), String>,
    users: BTreeMap<(i64, String), SourceUser>,
    progress_history: Vec<String>,
    next_id: i64,
}

/// In-memory mirror store with the same observable semantics as the SQLite
/// implementation, plus snapshot accessors for assertions.
#[derive(Default)]
pub struct InMemoryMirrorStore {
    state: Mutex<MirrorState>,
}

impl InMemoryMirrorStore {
    /// Store pre-seeded with one active connector of the given ID.
    pub fn with_connector(connector_id: i64) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            state.next_id = connector_id + 1;
            state.connectors.insert(
                connector_id,
                ConnectorRecord {
                    id: connector_id,
                    provider: "slack".to_string(),
                    connection_ref: "conn-test".to_string(),
                    workspace_id: "w-test".to_string(),
                    data_source: "managed-slack".to_string(),
                    status: "active".to_string(),
                    last_sync_status: None,
                    last_sync_reason: None,
                    sync_progress: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            );
        }
        store
    }

    pub fn connector(&self, connector_id: i64) -> Option<ConnectorRecord> {
        self.state
            .lock()
            .unwrap()
            .connectors
            .get(&connector_id)
            .cloned()
    }

    /// All resource rows, ordered by `(connector_id, external_id)`.
    pub fn snapshot_resources(&self) -> Vec<ResourceRecord> {
        self.state.lock().unwrap().resources.values().cloned().collect()
    }

    /// Every progress label ever reported, in order.
    pub fn progress_history(&self) -> Vec<String> {
        self.state.lock().unwrap().progress_history.clone()
    }
}

#[async_trait::async_trait]
impl MirrorStore for InMemoryMirrorStore {
    async fn create_connector(&self, new: &NewConnector) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(1);
        let id = state.next_id;
        state.next_id += 1;
        state.connectors.insert(
            id,
            ConnectorRecord {
                id,
                provider: new.provider.clone(),
                connection_ref: new.connection_ref.clone(),
                workspace_id: new.workspace_id.clone(),
                data_source: new.data_source.clone(),
                status: "active".to_string(),
                last_sync_status: None,
                last_sync_reason: None,
                sync_progress: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn get_connector(&self, connector_id: i64) -> Result<Option<ConnectorRecord>, StoreError> {
        Ok(self.connector(connector_id))
    }

    async fn delete_connector(&self, connector_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.connectors.remove(&connector_id).is_none() {
            return Err(StoreError::ConnectorNotFound(connector_id));
        }
        state.resources.retain(|(cid, _), _| *cid != connector_id);
        state.cursors.retain(|(cid, _), _| *cid != connector_id);
        state.users.retain(|(cid, _), _| *cid != connector_id);
        Ok(())
    }

    async fn upsert_resource(&self, record: &ResourceRecord) -> Result<(), StoreError> {
        self.state.lock().unwrap().resources.insert(
            (record.connector_id, record.external_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn delete_resources(&self, connector_id: i64, ids: &[String]) -> Result<(), StoreError> {
        let ids: HashSet<&String> = ids.iter().collect();
        self.state.lock().unwrap().resources.retain(|(cid, _), record| {
            *cid != connector_id
                || (!ids.contains(&record.external_id)
                    && !record.parent_id.as_ref().is_some_and(|p| ids.contains(p)))
        });
        Ok(())
    }

    async fn list_resources(
        &self,
        connector_id: i64,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .resources
            .values()
            .filter(|r| r.connector_id == connector_id)
            .filter(|r| {
                filter
                    .kind
                    .is_none_or(|kind| r.resource_type == kind.as_str())
            })
            .filter(|r| {
                filter
                    .parent_id
                    .as_ref()
                    .is_none_or(|p| r.parent_id.as_ref() == Some(p))
            })
            .cloned()
            .collect())
    }

    async fn get_cursor(
        &self,
        connector_id: i64,
        stream_key: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .cursors
            .get(&(connector_id, stream_key.to_string()))
            .cloned())
    }

    async fn set_cursor(
        &self,
        connector_id: i64,
        stream_key: &str,
        token: &str,
    ) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .cursors
            .insert((connector_id, stream_key.to_string()), token.to_string());
        Ok(())
    }

    async fn clear_cursor(&self, connector_id: i64, stream_key: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .cursors
            .remove(&(connector_id, stream_key.to_string()));
        Ok(())
    }

    async fn mark_sync_success(&self, connector_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let connector = state
            .connectors
            .get_mut(&connector_id)
            .ok_or(StoreError::ConnectorNotFound(connector_id))?;
        connector.last_sync_status = Some("success".to_string());
        connector.last_sync_reason = None;
        connector.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_sync_failure(&self, connector_id: i64, reason: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let connector = state
            .connectors
            .get_mut(&connector_id)
            .ok_or(StoreError::ConnectorNotFound(connector_id))?;
        connector.last_sync_status = Some("failed".to_string());
        connector.last_sync_reason = Some(reason.to_string());
        connector.status = "error".to_string();
        connector.updated_at = Utc::now();
        Ok(())
    }

    async fn report_sync_progress(&self, connector_id: i64, label: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let connector = state
            .connectors
            .get_mut(&connector_id)
            .ok_or(StoreError::ConnectorNotFound(connector_id))?;
        connector.sync_progress = Some(label.to_string());
        connector.updated_at = Utc::now();
        state.progress_history.push(label.to_string());
        Ok(())
    }

    async fn upsert_users(
        &self,
        connector_id: i64,
        users: &[SourceUser],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        for user in users {
            state
                .users
                .insert((connector_id, user.id.clone()), user.clone());
        }
        Ok(())
    }
}

/// In-memory substrate persistence. Timing tests run under
/// `tokio::time::pause`, where a real SQLite backend's blocking IO would
/// let the paused clock auto-advance.
#[derive(Default)]
pub struct MemoryPersistence {
    instances: Mutex<HashMap<String, InstanceRecord>>,
    events: Mutex<Vec<EventRecord>>,
}

impl MemoryPersistence {
    /// Events of one type for one instance, in insertion order.
    pub fn events_of(&self, instance_id: &str, event_type: &str) -> Vec<EventRecord> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.instance_id == instance_id && e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl Persistence for MemoryPersistence {
    async fn register_instance(&self, instance_id: &str, kind: &str) -> Result<(), CoreError> {
        self.instances.lock().unwrap().insert(
            instance_id.to_string(),
            InstanceRecord {
                instance_id: instance_id.to_string(),
                kind: kind.to_string(),
                status: "running".to_string(),
                created_at: Utc::now(),
                started_at: Some(Utc::now()),
                finished_at: None,
                error: None,
            },
        );
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError> {
        Ok(self.instances.lock().unwrap().get(instance_id).cloned())
    }

    async fn complete_instance(
        &self,
        instance_id: &str,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        let mut instances = self.instances.lock().unwrap();
        if let Some(record) = instances.get_mut(instance_id) {
            record.status = if error.is_some() { "failed" } else { "completed" }.to_string();
            record.finished_at = Some(Utc::now());
            record.error = error.map(str::to_string);
        }
        Ok(())
    }

    async fn list_instances(
        &self,
        status: Option<&str>,
        limit: i64,
    ) -> Result<Vec<InstanceRecord>, CoreError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .values()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_event(&self, event: &EventRecord) -> Result<(), CoreError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn list_events(
        &self,
        instance_id: &str,
        event_type: Option<&str>,
    ) -> Result<Vec<EventRecord>, CoreError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .filter(|e| event_type.is_none_or(|t| e.event_type == t))
            .cloned()
            .collect())
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        Ok(true)
    }
}

/// Content index double that records the live document set.
#[derive(Default)]
pub struct RecordingIndex {
    documents: Mutex<BTreeMap<String, IndexDocument>>,
}

impl RecordingIndex {
    /// IDs of documents currently in the index, sorted.
    pub fn document_ids(&self) -> Vec<String> {
        self.documents.lock().unwrap().keys().cloned().collect()
    }

    pub fn document(&self, document_id: &str) -> Option<IndexDocument> {
        self.documents.lock().unwrap().get(document_id).cloned()
    }
}

#[async_trait::async_trait]
impl ContentIndex for RecordingIndex {
    async fn upsert_document(&self, doc: &IndexDocument) -> Result<(), IndexError> {
        self.documents
            .lock()
            .unwrap()
            .insert(doc.document_id.clone(), doc.clone());
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), IndexError> {
        self.documents.lock().unwrap().remove(document_id);
        Ok(())
    }
}
