// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Slack workflow bodies.
//!
//! Workflows only sequence activities and suspend on context methods; every
//! side effect goes through [`SlackActivities`]. Debounce and membership
//! workflows are infinite actors that park on their signal channel and exit
//! when the runtime shuts the channel.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tidesync_core::{SignalWait, WorkflowCtx, WorkflowError};
use tracing::{info, warn};

use crate::slack::activities::SlackActivities;
use crate::slack::sync_one_channel_workflow_id;
use crate::source::ContainerInfo;
use crate::utils::{source_ts_to_ms, week_end_ms, week_start_ms};

/// Quiet window a debounce actor waits for before flushing.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(10);

/// Payload of a membership-change signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipSignal {
    /// Channel the integration was added to.
    pub channel_id: String,
}

/// Workspace-wide full sync.
///
/// Channels are synced strictly one child at a time; a failed channel is
/// recorded and must not abort its siblings. The run ends with either a
/// success mark or an aggregate failure reason on the connector row; a
/// terminal failure of the workflow itself is also written to the row
/// before it propagates, so operators never see a silently dead run.
pub async fn workspace_full_sync(
    ctx: WorkflowCtx,
    acts: SlackActivities,
    from_ts_ms: Option<i64>,
) -> Result<(), WorkflowError> {
    let result = run_workspace_full_sync(&ctx, &acts, from_ts_ms).await;
    if let Err(err) = &result {
        report_terminal_failure(&ctx, &acts, err).await;
    }
    result
}

async fn run_workspace_full_sync(
    ctx: &WorkflowCtx,
    acts: &SlackActivities,
    from_ts_ms: Option<i64>,
) -> Result<(), WorkflowError> {
    ctx.execute_activity("fetch_users", || acts.fetch_users()).await?;
    let channels = ctx
        .execute_activity("get_channels", || acts.get_channels(true))
        .await?;

    let total = channels.len();
    info!(
        instance_id = %ctx.instance_id(),
        channels = total,
        "starting workspace full sync"
    );

    let mut failed = 0usize;
    for (i, channel) in channels.iter().enumerate() {
        let child_id = sync_one_channel_workflow_id(acts.connector_id(), &channel.id);
        let result = ctx
            .execute_child(&child_id, "syncOneChannel", {
                let acts = acts.clone();
                let channel = channel.clone();
                move |ctx| sync_one_channel(ctx, acts, channel, false, from_ts_ms)
            })
            .await;

        if let Err(err) = result {
            warn!(
                instance_id = %ctx.instance_id(),
                channel_id = %channel.id,
                error = %err,
                "channel sync failed, continuing with remaining channels"
            );
            failed += 1;
            ctx.record_event("child_failed", Some(err.to_string().into_bytes()))
                .await
                .map_err(|e| WorkflowError::Logic(e.to_string()))?;
        }

        let percent = (((i + 1) as f64 / total as f64) * 100.0).round() as u32;
        let label = format!("{percent}%");
        ctx.execute_activity("report_initial_sync_progress", || {
            acts.report_initial_sync_progress(&label)
        })
        .await?;
    }

    if failed > 0 {
        let reason = format!("{failed} of {total} channels failed");
        ctx.execute_activity("save_failed_sync", || acts.save_failed_sync(&reason))
            .await?;
    } else {
        ctx.execute_activity("save_success_sync", || acts.save_success_sync())
            .await?;
    }
    Ok(())
}

/// Sync one channel to exhaustion, resuming from any persisted cursor.
pub async fn sync_one_channel(
    ctx: WorkflowCtx,
    acts: SlackActivities,
    channel: ContainerInfo,
    update_sync_status: bool,
    from_ts_ms: Option<i64>,
) -> Result<(), WorkflowError> {
    let channel_id = channel.id;
    let Some(channel_name) = channel.name else {
        return Err(WorkflowError::Logic(format!(
            "channel {channel_id} has no name"
        )));
    };

    ctx.execute_activity("join_channel", || acts.join_channel(&channel_id))
        .await?;

    let mut cursor = ctx
        .execute_activity("load_channel_cursor", || {
            acts.load_channel_cursor(&channel_id)
        })
        .await?;
    let mut weeks_synced = HashSet::new();

    loop {
        let outcome = ctx
            .execute_activity("sync_channel", || {
                acts.sync_channel(
                    &channel_id,
                    &channel_name,
                    from_ts_ms,
                    cursor.clone(),
                    weeks_synced.clone(),
                )
            })
            .await?;
        weeks_synced = outcome.weeks_synced;
        cursor = outcome.next_cursor;
        if cursor.is_none() {
            break;
        }
    }

    if update_sync_status {
        ctx.execute_activity("save_success_sync", || acts.save_success_sync())
            .await?;
    }
    Ok(())
}

/// Debounce actor for one thread.
///
/// Parks until a signal arrives, then restarts a [`DEBOUNCE_WINDOW`] timer
/// on every further signal; when the window finally elapses the thread is
/// synced once. A signal landing while the flush itself is running is
/// buffered by the channel and starts the next debounce round instead of
/// being folded into the current one.
///
/// A terminal flush failure is written to the connector row before the
/// actor dies.
pub async fn sync_one_thread_debounced(
    mut ctx: WorkflowCtx,
    acts: SlackActivities,
    channel_id: String,
    thread_ts: String,
) -> Result<(), WorkflowError> {
    let result = run_sync_one_thread_debounced(&mut ctx, &acts, &channel_id, &thread_ts).await;
    if let Err(err) = &result {
        report_terminal_failure(&ctx, &acts, err).await;
    }
    result
}

async fn run_sync_one_thread_debounced(
    ctx: &mut WorkflowCtx,
    acts: &SlackActivities,
    channel_id: &str,
    thread_ts: &str,
) -> Result<(), WorkflowError> {
    loop {
        if ctx.next_signal().await.is_none() {
            return Ok(());
        }
        let Some(debounce_count) = wait_for_quiet_window(ctx).await else {
            return Ok(());
        };

        let channel_name = resolve_channel_name(ctx, acts, channel_id).await?;
        ctx.execute_activity("sync_thread", || {
            acts.sync_thread(channel_id, &channel_name, thread_ts)
        })
        .await?;
        ctx.execute_activity("save_success_sync", || acts.save_success_sync())
            .await?;
        record_flush(ctx, debounce_count).await?;
    }
}

/// Debounce actor for the non-threaded messages of one week bucket.
///
/// A terminal flush failure is written to the connector row before the
/// actor dies.
pub async fn sync_one_message_debounced(
    mut ctx: WorkflowCtx,
    acts: SlackActivities,
    channel_id: String,
    message_ts: String,
) -> Result<(), WorkflowError> {
    let result = run_sync_one_message_debounced(&mut ctx, &acts, &channel_id, &message_ts).await;
    if let Err(err) = &result {
        report_terminal_failure(&ctx, &acts, err).await;
    }
    result
}

async fn run_sync_one_message_debounced(
    ctx: &mut WorkflowCtx,
    acts: &SlackActivities,
    channel_id: &str,
    message_ts: &str,
) -> Result<(), WorkflowError> {
    let Some(ts_ms) = source_ts_to_ms(message_ts) else {
        return Err(WorkflowError::Logic(format!(
            "unparseable message timestamp {message_ts:?}"
        )));
    };
    let start_ts_ms = week_start_ms(ts_ms);
    let end_ts_ms = week_end_ms(start_ts_ms);

    loop {
        if ctx.next_signal().await.is_none() {
            return Ok(());
        }
        let Some(debounce_count) = wait_for_quiet_window(ctx).await else {
            return Ok(());
        };

        let channel_name = resolve_channel_name(ctx, acts, channel_id).await?;
        ctx.execute_activity("sync_non_threaded", || {
            acts.sync_non_threaded(channel_id, &channel_name, start_ts_ms, end_ts_ms)
        })
        .await?;
        ctx.execute_activity("save_success_sync", || acts.save_success_sync())
            .await?;
        record_flush(ctx, debounce_count).await?;
    }
}

/// Membership-event queue actor.
///
/// Signals carry a channel ID; the actor keeps a deduplicated FIFO and
/// drains it one channel at a time, launching a full single-channel sync
/// per entry. New signals arriving mid-sync are buffered and folded into
/// the queue before the next entry is taken.
pub async fn member_joined_channel(
    mut ctx: WorkflowCtx,
    acts: SlackActivities,
) -> Result<(), WorkflowError> {
    let result = run_member_joined_channel(&mut ctx, &acts).await;
    if let Err(err) = &result {
        report_terminal_failure(&ctx, &acts, err).await;
    }
    result
}

async fn run_member_joined_channel(
    ctx: &mut WorkflowCtx,
    acts: &SlackActivities,
) -> Result<(), WorkflowError> {
    let mut queue: VecDeque<String> = VecDeque::new();
    loop {
        if queue.is_empty() {
            let Some(envelope) = ctx.next_signal().await else {
                return Ok(());
            };
            enqueue_membership(&mut queue, &envelope);
        }
        while let Some(envelope) = ctx.try_next_signal() {
            enqueue_membership(&mut queue, &envelope);
        }
        let Some(channel_id) = queue.pop_front() else {
            continue;
        };

        let channel = ctx
            .execute_activity("get_channel", || acts.get_channel(&channel_id))
            .await?;
        let Some(channel) = channel else {
            warn!(channel_id, "joined channel no longer exists upstream, skipping");
            continue;
        };

        let child_id = sync_one_channel_workflow_id(acts.connector_id(), &channel_id);
        ctx.execute_child(&child_id, "syncOneChannel", {
            let acts = acts.clone();
            move |ctx| sync_one_channel(ctx, acts, channel, true, None)
        })
        .await?;
    }
}

/// Garbage-collect channels that disappeared upstream.
///
/// Index purges run one activity call per channel so a crash mid-run
/// leaves completed purges behind; the mirror delete is a single batch at
/// the end.
pub async fn slack_garbage_collector(
    ctx: WorkflowCtx,
    acts: SlackActivities,
) -> Result<(), WorkflowError> {
    let set = ctx
        .execute_activity("get_channels_to_garbage_collect", || {
            acts.get_channels_to_garbage_collect()
        })
        .await?;
    if set.is_empty() {
        return Ok(());
    }

    for channel_id in &set.to_delete_from_index {
        ctx.execute_activity("delete_channel", || acts.delete_channel(channel_id))
            .await?;
    }
    ctx.execute_activity("delete_channels_from_mirror", || {
        acts.delete_channels_from_mirror(set.to_delete_from_mirror.clone())
    })
    .await?;
    Ok(())
}

/// Restart the quiet-window timer on every signal; return the number of
/// coalesced signals once the window elapses, or `None` on shutdown.
async fn wait_for_quiet_window(ctx: &mut WorkflowCtx) -> Option<u32> {
    let mut debounce_count: u32 = 0;
    loop {
        match ctx.next_signal_timeout(DEBOUNCE_WINDOW).await {
            SignalWait::Signal(_) => debounce_count += 1,
            SignalWait::Elapsed => return Some(debounce_count),
            SignalWait::Closed => return None,
        }
    }
}

async fn resolve_channel_name(
    ctx: &WorkflowCtx,
    acts: &SlackActivities,
    channel_id: &str,
) -> Result<String, WorkflowError> {
    let channel = ctx
        .execute_activity("get_channel", || acts.get_channel(channel_id))
        .await?
        .ok_or_else(|| WorkflowError::Logic(format!("channel {channel_id} not found upstream")))?;
    channel
        .name
        .ok_or_else(|| WorkflowError::Logic(format!("channel {channel_id} has no name")))
}

async fn record_flush(ctx: &WorkflowCtx, debounce_count: u32) -> Result<(), WorkflowError> {
    let payload = serde_json::json!({ "debounce_count": debounce_count });
    ctx.record_event("debounce_flush", Some(payload.to_string().into_bytes()))
        .await
        .map_err(|e| WorkflowError::Logic(e.to_string()))
}

/// Best-effort: mark the connector failed before a workflow dies so the
/// status row never stays on its previous value after a terminal error.
async fn report_terminal_failure(ctx: &WorkflowCtx, acts: &SlackActivities, err: &WorkflowError) {
    let reason = err.to_string();
    if let Err(report_err) = ctx
        .execute_activity("save_failed_sync", || acts.save_failed_sync(&reason))
        .await
    {
        warn!(
            instance_id = %ctx.instance_id(),
            error = %report_err,
            "failed to record sync failure"
        );
    }
}

fn enqueue_membership(queue: &mut VecDeque<String>, envelope: &tidesync_core::SignalEnvelope) {
    match envelope.decode::<MembershipSignal>() {
        Ok(signal) => {
            if !queue.contains(&signal.channel_id) {
                queue.push_back(signal.channel_id);
            }
        }
        Err(err) => warn!(error = %err, "dropping malformed membership signal"),
    }
}
