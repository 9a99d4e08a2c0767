// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outward-facing entry points for triggering syncs.
//!
//! The dispatcher is the seam between transport handlers (HTTP webhooks,
//! admin endpoints, schedulers) and the workflow layer: it validates the
//! connector, derives the deterministic workflow ID, and starts or signals
//! the matching instance. Everything it launches is fire-and-forget; only
//! dispatcher-level failures are returned synchronously.

use std::sync::Arc;

use thiserror::Error;
use tidesync_core::{CoreError, SignalEnvelope, StartOutcome, SyncRuntime};
use tracing::info;

use crate::index::ContentIndex;
use crate::slack::workflows::{
    MembershipSignal, member_joined_channel, slack_garbage_collector,
    sync_one_message_debounced, sync_one_thread_debounced, workspace_full_sync,
};
use crate::slack::{
    SlackActivities, garbage_collector_workflow_id, member_joined_channel_workflow_id,
    sync_one_message_debounced_workflow_id, sync_one_thread_debounced_workflow_id,
    workspace_full_sync_workflow_id,
};
use crate::source::SourceClient;
use crate::store::{ConnectorRecord, MirrorStore, StoreError};
use crate::utils::{source_ts_to_ms, week_start_ms};

/// A webhook-reported message change, routed to the matching debounce actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRef {
    /// A message inside a thread; debounced per thread.
    Thread {
        /// Thread root timestamp.
        thread_ts: String,
    },
    /// A non-threaded message; debounced per containing week bucket.
    Standalone {
        /// Message timestamp.
        message_ts: String,
    },
}

/// Dispatcher-level failures, reported synchronously to the caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The connector does not exist.
    #[error("connector {0} not found")]
    ConnectorNotFound(i64),

    /// The connector is paused; syncing it is refused.
    #[error("connector {0} is paused")]
    ConnectorPaused(i64),

    /// A message timestamp could not be parsed.
    #[error("unparseable message timestamp {0:?}")]
    BadTimestamp(String),

    /// Mirror store failure while validating the connector.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Substrate failure while starting or signalling an instance.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Routes triggers onto workflow instances.
#[derive(Clone)]
pub struct SyncDispatcher {
    runtime: SyncRuntime,
    client: Arc<dyn SourceClient>,
    store: Arc<dyn MirrorStore>,
    index: Arc<dyn ContentIndex>,
}

impl SyncDispatcher {
    pub fn new(
        runtime: SyncRuntime,
        client: Arc<dyn SourceClient>,
        store: Arc<dyn MirrorStore>,
        index: Arc<dyn ContentIndex>,
    ) -> Self {
        Self {
            runtime,
            client,
            store,
            index,
        }
    }

    /// The underlying runtime, for lifecycle management (shutdown).
    pub fn runtime(&self) -> &SyncRuntime {
        &self.runtime
    }

    /// Kick off a workspace-wide full sync.
    ///
    /// Returns [`StartOutcome::AlreadyRunning`] when an identical sync is
    /// in flight; the caller treats that as an acknowledged no-op.
    pub async fn start_full_sync(
        &self,
        connector_id: i64,
        from_ts_ms: Option<i64>,
    ) -> Result<StartOutcome, DispatchError> {
        self.active_connector(connector_id).await?;

        let id = workspace_full_sync_workflow_id(connector_id, from_ts_ms);
        let acts = self.activities(connector_id);
        let outcome = self
            .runtime
            .start_workflow(&id, "workspaceFullSync", move |ctx| {
                workspace_full_sync(ctx, acts, from_ts_ms)
            })
            .await?;
        if outcome == StartOutcome::AlreadyRunning {
            info!(connector_id, instance_id = %id, "full sync already running");
        }
        Ok(outcome)
    }

    /// Route a message-changed webhook to the right debounce actor,
    /// starting the actor if it is not running.
    pub async fn notify_webhook(
        &self,
        connector_id: i64,
        channel_id: &str,
        message: MessageRef,
    ) -> Result<(), DispatchError> {
        if self.connector_is_paused(connector_id).await? {
            info!(connector_id, channel_id, "connector paused, dropping webhook");
            return Ok(());
        }

        let acts = self.activities(connector_id);
        match message {
            MessageRef::Thread { thread_ts } => {
                let id =
                    sync_one_thread_debounced_workflow_id(connector_id, channel_id, &thread_ts);
                let channel_id = channel_id.to_string();
                self.runtime
                    .signal_with_start(
                        &id,
                        "syncOneThreadDebounced",
                        SignalEnvelope::empty("newWebhook"),
                        move |ctx| sync_one_thread_debounced(ctx, acts, channel_id, thread_ts),
                    )
                    .await?;
            }
            MessageRef::Standalone { message_ts } => {
                let Some(ts_ms) = source_ts_to_ms(&message_ts) else {
                    return Err(DispatchError::BadTimestamp(message_ts));
                };
                let week = week_start_ms(ts_ms);
                let id = sync_one_message_debounced_workflow_id(connector_id, channel_id, week);
                let channel_id = channel_id.to_string();
                self.runtime
                    .signal_with_start(
                        &id,
                        "syncOneMessageDebounced",
                        SignalEnvelope::empty("newWebhook"),
                        move |ctx| sync_one_message_debounced(ctx, acts, channel_id, message_ts),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Feed a membership event into the connector's queue actor, starting
    /// the actor if it is not running.
    pub async fn notify_membership_change(
        &self,
        connector_id: i64,
        channel_id: &str,
    ) -> Result<(), DispatchError> {
        if self.connector_is_paused(connector_id).await? {
            info!(connector_id, channel_id, "connector paused, dropping membership event");
            return Ok(());
        }

        let id = member_joined_channel_workflow_id(connector_id);
        let envelope = SignalEnvelope::json(
            "memberJoined",
            &MembershipSignal {
                channel_id: channel_id.to_string(),
            },
        )?;
        let acts = self.activities(connector_id);
        self.runtime
            .signal_with_start(&id, "memberJoinedChannel", envelope, move |ctx| {
                member_joined_channel(ctx, acts)
            })
            .await?;
        Ok(())
    }

    /// Kick off a garbage-collection run.
    pub async fn schedule_garbage_collection(
        &self,
        connector_id: i64,
    ) -> Result<StartOutcome, DispatchError> {
        self.active_connector(connector_id).await?;

        let id = garbage_collector_workflow_id(connector_id);
        let acts = self.activities(connector_id);
        Ok(self
            .runtime
            .start_workflow(&id, "slackGarbageCollector", move |ctx| {
                slack_garbage_collector(ctx, acts)
            })
            .await?)
    }

    fn activities(&self, connector_id: i64) -> SlackActivities {
        SlackActivities::new(
            connector_id,
            self.client.clone(),
            self.store.clone(),
            self.index.clone(),
        )
    }

    async fn active_connector(&self, connector_id: i64) -> Result<ConnectorRecord, DispatchError> {
        let connector = self
            .store
            .get_connector(connector_id)
            .await?
            .ok_or(DispatchError::ConnectorNotFound(connector_id))?;
        if connector.status == "paused" {
            return Err(DispatchError::ConnectorPaused(connector_id));
        }
        Ok(connector)
    }

    async fn connector_is_paused(&self, connector_id: i64) -> Result<bool, DispatchError> {
        match self.active_connector(connector_id).await {
            Ok(_) => Ok(false),
            Err(DispatchError::ConnectorPaused(_)) => Ok(true),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FakeSourceClient, InMemoryMirrorStore, MemoryPersistence, RecordingIndex,
    };
    use std::time::Duration;

    struct Harness {
        dispatcher: SyncDispatcher,
        client: Arc<FakeSourceClient>,
        store: Arc<InMemoryMirrorStore>,
    }

    fn harness() -> Harness {
        let runtime = SyncRuntime::builder()
            .persistence(Arc::new(MemoryPersistence::default()))
            .build()
            .unwrap();
        let client = Arc::new(FakeSourceClient::default());
        let store = Arc::new(InMemoryMirrorStore::with_connector(1));
        let index = Arc::new(RecordingIndex::default());
        let dispatcher =
            SyncDispatcher::new(runtime, client.clone(), store.clone(), index);
        Harness {
            dispatcher,
            client,
            store,
        }
    }

    #[tokio::test]
    async fn full_sync_requires_an_existing_connector() {
        let h = harness();
        let err = h.dispatcher.start_full_sync(99, None).await.unwrap_err();
        assert!(matches!(err, DispatchError::ConnectorNotFound(99)));
    }

    #[tokio::test]
    async fn duplicate_full_sync_is_an_acknowledged_noop() {
        let h = harness();
        h.client.add_channel("C01", Some("general"));

        let first = h.dispatcher.start_full_sync(1, None).await.unwrap();
        let second = h.dispatcher.start_full_sync(1, None).await;
        assert_eq!(first, StartOutcome::Started);
        // Either the first run is still in flight (no-op) or it already
        // finished and a fresh run starts; both are valid acknowledgements.
        assert!(second.is_ok());

        let id = workspace_full_sync_workflow_id(1, None);
        let _ = h.dispatcher.runtime().wait_for(&id).await;
    }

    #[tokio::test(start_paused = true)]
    async fn webhook_events_bootstrap_their_debounce_actor() {
        let h = harness();
        h.client.add_channel("C01", Some("general"));
        h.client.add_message(
            "C01",
            crate::source::SourceMessage {
                ts: "1700000000.000100".to_string(),
                thread_ts: None,
                author: "U01".to_string(),
                text: "hello".to_string(),
            },
        );

        h.dispatcher
            .notify_webhook(
                1,
                "C01",
                MessageRef::Standalone {
                    message_ts: "1700000000.000100".to_string(),
                },
            )
            .await
            .unwrap();

        let week = week_start_ms(1_700_000_000_000);
        let id = sync_one_message_debounced_workflow_id(1, "C01", week);
        assert!(h.dispatcher.runtime().is_running(&id));

        tokio::time::sleep(Duration::from_secs(15)).await;
        let connector = h.store.connector(1).unwrap();
        assert_eq!(connector.last_sync_status.as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn webhook_with_bad_timestamp_is_rejected() {
        let h = harness();
        let err = h
            .dispatcher
            .notify_webhook(
                1,
                "C01",
                MessageRef::Standalone {
                    message_ts: "garbage".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::BadTimestamp(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn membership_events_share_one_queue_actor() {
        let h = harness();
        h.client.add_channel("C01", Some("one"));
        h.client.add_channel("C02", Some("two"));

        h.dispatcher.notify_membership_change(1, "C01").await.unwrap();
        h.dispatcher.notify_membership_change(1, "C02").await.unwrap();

        let id = member_joined_channel_workflow_id(1);
        assert!(h.dispatcher.runtime().is_running(&id));
        assert_eq!(h.dispatcher.runtime().running_kind(&id).as_deref(), Some("memberJoinedChannel"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.client.joined_channels().len(), 2);
    }

    #[tokio::test]
    async fn garbage_collection_runs_to_completion() {
        let h = harness();
        let outcome = h.dispatcher.schedule_garbage_collection(1).await.unwrap();
        assert_eq!(outcome, StartOutcome::Started);

        let id = garbage_collector_workflow_id(1);
        let _ = h.dispatcher.runtime().wait_for(&id).await;
    }
}
