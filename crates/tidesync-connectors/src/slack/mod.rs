// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Slack connector orchestration: activities, workflows, and the
//! deterministic workflow-ID scheme.
//!
//! Every workflow instance ID is a pure function of its routing inputs, so
//! concurrent triggers for the same logical work land on the same instance
//! and the runtime's at-most-one-instance guarantee deduplicates them.

pub mod activities;
pub mod workflows;

pub use activities::{
    GarbageCollectionSet, SlackActivities, SyncChannelOutcome, thread_document_id,
    week_document_id,
};

/// ID of the workspace-wide full sync for one connector.
///
/// An incremental run (bounded from below) gets a distinct ID so it can
/// coexist with state left behind by a previous unbounded run.
pub fn workspace_full_sync_workflow_id(connector_id: i64, from_ts_ms: Option<i64>) -> String {
    match from_ts_ms {
        Some(ts) => format!("slack-workspaceFullSync-{connector_id}-fromTs-{ts}"),
        None => format!("slack-workspaceFullSync-{connector_id}"),
    }
}

/// ID of the single-channel sync for one connector/channel pair.
///
/// Shared by full-sync children and membership-triggered syncs, so a
/// membership event during a full sync joins the already-running child.
pub fn sync_one_channel_workflow_id(connector_id: i64, channel_id: &str) -> String {
    format!("slack-syncOneChannel-{connector_id}-{channel_id}")
}

/// ID of the debounce actor for one thread.
pub fn sync_one_thread_debounced_workflow_id(
    connector_id: i64,
    channel_id: &str,
    thread_ts: &str,
) -> String {
    format!("slack-syncOneThreadDebounced-{connector_id}-{channel_id}-{thread_ts}")
}

/// ID of the debounce actor for non-threaded messages of one week bucket.
///
/// Keyed by the week start rather than the message timestamp, so edits
/// anywhere in the same week coalesce onto one actor.
pub fn sync_one_message_debounced_workflow_id(
    connector_id: i64,
    channel_id: &str,
    week_start_ms: i64,
) -> String {
    format!("slack-syncOneMessageDebounced-{connector_id}-{channel_id}-{week_start_ms}")
}

/// ID of the membership-event queue actor for one connector.
pub fn member_joined_channel_workflow_id(connector_id: i64) -> String {
    format!("slack-memberJoinedChannel-{connector_id}")
}

/// ID of the garbage-collection run for one connector.
pub fn garbage_collector_workflow_id(connector_id: i64) -> String {
    format!("slack-garbageCollector-{connector_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_ids_are_deterministic_and_distinct() {
        assert_eq!(
            workspace_full_sync_workflow_id(7, None),
            "slack-workspaceFullSync-7"
        );
        assert_eq!(
            workspace_full_sync_workflow_id(7, Some(1_700_000_000_000)),
            "slack-workspaceFullSync-7-fromTs-1700000000000"
        );
        assert_ne!(
            sync_one_channel_workflow_id(7, "C01"),
            sync_one_channel_workflow_id(7, "C02")
        );
        assert_eq!(
            sync_one_thread_debounced_workflow_id(7, "C01", "1700000000.000100"),
            "slack-syncOneThreadDebounced-7-C01-1700000000.000100"
        );
        assert_eq!(
            member_joined_channel_workflow_id(9),
            "slack-memberJoinedChannel-9"
        );
    }
}
