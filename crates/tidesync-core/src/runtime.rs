// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable durable-execution runtime.
//!
//! [`SyncRuntime`] multiplexes many workflow instances over tokio, keyed by
//! deterministic instance IDs. Each instance runs as a single logical thread:
//! the only suspension points are awaiting an activity, a timer, a signal, or
//! a child workflow. At-most-one-running-instance-per-ID is enforced by the
//! in-memory registry, not locking; starting an ID that is already running is
//! a no-op reported as [`StartOutcome::AlreadyRunning`].
//!
//! # Example
//!
//! ```rust,ignore
//! let runtime = SyncRuntime::builder()
//!     .persistence(persistence)
//!     .build()?;
//!
//! runtime
//!     .start_workflow("slack-workspaceFullSync-1", "workspaceFullSync", |ctx| async move {
//!         // workflow body
//!         Ok(())
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{ActivityError, CoreError, WorkflowError};
use crate::persistence::{EventRecord, Persistence};
use crate::retry::RetryPolicy;

/// An out-of-band message delivered to a running workflow instance.
///
/// Signals to one instance are observed in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEnvelope {
    /// Signal name (e.g. `newWebhook`, `memberJoined`).
    pub name: String,
    /// Opaque payload bytes (JSON by convention).
    pub payload: Vec<u8>,
}

impl SignalEnvelope {
    /// A signal with no payload.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Vec::new(),
        }
    }

    /// A signal with a JSON payload.
    pub fn json<T: serde::Serialize>(name: impl Into<String>, value: &T) -> Result<Self, CoreError> {
        Ok(Self {
            name: name.into(),
            payload: serde_json::to_vec(value)?,
        })
    }

    /// Decode the payload as JSON.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, CoreError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Outcome of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new instance was created.
    Started,
    /// An instance with this ID is already running; the start was a no-op.
    AlreadyRunning,
}

/// Outcome of waiting for a signal with a timeout window.
#[derive(Debug)]
pub enum SignalWait {
    /// A signal arrived within the window.
    Signal(SignalEnvelope),
    /// The window elapsed with no signal.
    Elapsed,
    /// The runtime shut the instance's signal channel; the actor should exit.
    Closed,
}

type DoneResult = Result<(), String>;

struct RunningInstance {
    kind: String,
    signal_tx: mpsc::UnboundedSender<SignalEnvelope>,
    done_rx: watch::Receiver<Option<DoneResult>>,
}

struct RuntimeInner {
    persistence: Arc<dyn Persistence>,
    retry: RetryPolicy,
    instances: DashMap<String, RunningInstance>,
}

impl RuntimeInner {
    /// Start an instance if absent, returning a completion receiver either way.
    async fn start<F, Fut>(
        self: &Arc<Self>,
        instance_id: &str,
        kind: &str,
        body: F,
    ) -> Result<(StartOutcome, watch::Receiver<Option<DoneResult>>), CoreError>
    where
        F: FnOnce(WorkflowCtx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), WorkflowError>> + Send + 'static,
    {
        if instance_id.is_empty() {
            return Err(CoreError::ValidationError {
                field: "instance_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(None);

        match self.instances.entry(instance_id.to_string()) {
            Entry::Occupied(existing) => {
                debug!(instance_id, "workflow already in progress, start is a no-op");
                return Ok((StartOutcome::AlreadyRunning, existing.get().done_rx.clone()));
            }
            Entry::Vacant(slot) => {
                slot.insert(RunningInstance {
                    kind: kind.to_string(),
                    signal_tx,
                    done_rx: done_rx.clone(),
                });
            }
        }

        if let Err(e) = self.persistence.register_instance(instance_id, kind).await {
            self.instances.remove(instance_id);
            return Err(e);
        }

        let ctx = WorkflowCtx {
            instance_id: instance_id.to_string(),
            inner: self.clone(),
            signals: signal_rx,
        };

        let inner = self.clone();
        let instance_id = instance_id.to_string();
        let kind = kind.to_string();
        tokio::spawn(async move {
            info!(instance_id = %instance_id, kind = %kind, "workflow instance started");
            let result = body(ctx).await;

            let error = result.as_ref().err().map(|e| e.to_string());
            match &error {
                None => info!(instance_id = %instance_id, "workflow instance completed"),
                Some(reason) => {
                    warn!(instance_id = %instance_id, %reason, "workflow instance failed")
                }
            }

            if let Err(e) = inner
                .persistence
                .complete_instance(&instance_id, error.as_deref())
                .await
            {
                error!(instance_id = %instance_id, error = %e, "failed to persist completion");
            }

            // Remove before publishing completion so a waiter can immediately
            // restart the same deterministic ID.
            inner.instances.remove(&instance_id);
            let _ = done_tx.send(Some(result.map_err(|e| e.to_string())));
        });

        Ok((StartOutcome::Started, done_rx))
    }

    fn signal(&self, instance_id: &str, envelope: SignalEnvelope) -> Result<(), CoreError> {
        let Some(instance) = self.instances.get(instance_id) else {
            return Err(CoreError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            });
        };
        instance
            .signal_tx
            .send(envelope)
            .map_err(|_| CoreError::SignalDeliveryFailed {
                instance_id: instance_id.to_string(),
                reason: "instance completed while delivering signal".to_string(),
            })
    }
}

async fn await_done(mut done_rx: watch::Receiver<Option<DoneResult>>) -> DoneResult {
    loop {
        if let Some(result) = done_rx.borrow().clone() {
            return result;
        }
        if done_rx.changed().await.is_err() {
            // Task dropped without publishing a result.
            return Err("workflow instance task dropped".to_string());
        }
    }
}

/// Builder for creating a [`SyncRuntime`].
#[derive(Default)]
pub struct SyncRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    retry: Option<RetryPolicy>,
}

impl SyncRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Override the activity retry policy.
    ///
    /// Default: exponential backoff with a 10-minute start-to-close budget.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Build the runtime.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<SyncRuntime> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;

        Ok(SyncRuntime {
            inner: Arc::new(RuntimeInner {
                persistence,
                retry: self.retry.unwrap_or_default(),
                instances: DashMap::new(),
            }),
        })
    }
}

/// The durable-execution runtime embedded into an application.
#[derive(Clone)]
pub struct SyncRuntime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for SyncRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRuntime").finish_non_exhaustive()
    }
}

impl SyncRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SyncRuntimeBuilder {
        SyncRuntimeBuilder::new()
    }

    /// Start a workflow instance with a deterministic ID.
    ///
    /// If an instance with this ID is already running, no new instance is
    /// created and [`StartOutcome::AlreadyRunning`] is returned.
    pub async fn start_workflow<F, Fut>(
        &self,
        instance_id: &str,
        kind: &str,
        body: F,
    ) -> Result<StartOutcome, CoreError>
    where
        F: FnOnce(WorkflowCtx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), WorkflowError>> + Send + 'static,
    {
        let (outcome, _done_rx) = self.inner.start(instance_id, kind, body).await?;
        Ok(outcome)
    }

    /// Deliver a signal to a running instance.
    ///
    /// Returns [`CoreError::InstanceNotFound`] if no instance with this ID is
    /// running.
    pub fn signal(&self, instance_id: &str, envelope: SignalEnvelope) -> Result<(), CoreError> {
        self.inner.signal(instance_id, envelope)
    }

    /// Signal an instance, starting it first if it is not running.
    ///
    /// This is the bootstrap primitive for signal-driven actors (debounce and
    /// queue workflows, which are long-lived once started). The start/signal
    /// race is closed by re-delivering the signal after the start call, which
    /// joins a concurrent starter instead of erroring.
    pub async fn signal_with_start<F, Fut>(
        &self,
        instance_id: &str,
        kind: &str,
        envelope: SignalEnvelope,
        body: F,
    ) -> Result<StartOutcome, CoreError>
    where
        F: FnOnce(WorkflowCtx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), WorkflowError>> + Send + 'static,
    {
        if self.inner.signal(instance_id, envelope.clone()).is_ok() {
            return Ok(StartOutcome::AlreadyRunning);
        }
        let outcome = self.start_workflow(instance_id, kind, body).await?;
        self.inner.signal(instance_id, envelope)?;
        Ok(outcome)
    }

    /// Wait for a running instance to finish. Errors if the ID is unknown.
    pub async fn wait_for(&self, instance_id: &str) -> Result<DoneResult, CoreError> {
        let done_rx = {
            let Some(instance) = self.inner.instances.get(instance_id) else {
                return Err(CoreError::InstanceNotFound {
                    instance_id: instance_id.to_string(),
                });
            };
            instance.done_rx.clone()
        };
        Ok(await_done(done_rx).await)
    }

    /// Whether an instance with this ID is currently running.
    pub fn is_running(&self, instance_id: &str) -> bool {
        self.inner.instances.contains_key(instance_id)
    }

    /// Number of currently running instances.
    pub fn running_count(&self) -> usize {
        self.inner.instances.len()
    }

    /// Kind of a running instance, if any.
    pub fn running_kind(&self, instance_id: &str) -> Option<String> {
        self.inner
            .instances
            .get(instance_id)
            .map(|i| i.kind.clone())
    }

    /// Get a reference to the persistence layer.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.inner.persistence
    }

    /// Shut down: close every instance's signal channel and wait for the
    /// instances to finish.
    ///
    /// Long-lived actors parked on a signal wait observe the closed channel
    /// and return; instances mid-activity finish their current step first.
    pub async fn shutdown(&self) {
        info!(
            running = self.inner.instances.len(),
            "SyncRuntime shutting down"
        );
        let waiters: Vec<_> = self
            .inner
            .instances
            .iter()
            .map(|entry| entry.value().done_rx.clone())
            .collect();
        // Dropping the registry entries drops the only signal senders.
        self.inner.instances.clear();
        for done_rx in waiters {
            let _ = await_done(done_rx).await;
        }
        info!("SyncRuntime shutdown complete");
    }
}

/// Per-instance handle passed to workflow bodies.
///
/// The only suspension points a workflow may use are the methods on this
/// context; all non-deterministic work belongs inside activities.
pub struct WorkflowCtx {
    instance_id: String,
    inner: Arc<RuntimeInner>,
    signals: mpsc::UnboundedReceiver<SignalEnvelope>,
}

impl WorkflowCtx {
    /// This instance's deterministic ID.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Park until the next signal arrives.
    ///
    /// Returns `None` when the runtime is shutting down; the actor should
    /// return cleanly. This is a true park on the channel, not a poll loop.
    pub async fn next_signal(&mut self) -> Option<SignalEnvelope> {
        self.signals.recv().await
    }

    /// Take an already-delivered signal without suspending.
    pub fn try_next_signal(&mut self) -> Option<SignalEnvelope> {
        self.signals.try_recv().ok()
    }

    /// Park for the next signal, giving up after `window`.
    pub async fn next_signal_timeout(&mut self, window: Duration) -> SignalWait {
        match tokio::time::timeout(window, self.signals.recv()).await {
            Ok(Some(envelope)) => SignalWait::Signal(envelope),
            Ok(None) => SignalWait::Closed,
            Err(_) => SignalWait::Elapsed,
        }
    }

    /// Durable-enough timer suspension.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Append an observability event to this instance's event log.
    pub async fn record_event(
        &self,
        event_type: &str,
        payload: Option<Vec<u8>>,
    ) -> Result<(), CoreError> {
        self.inner
            .persistence
            .insert_event(&EventRecord {
                id: None,
                instance_id: self.instance_id.clone(),
                event_type: event_type.to_string(),
                payload,
                created_at: Utc::now(),
            })
            .await
    }

    /// Execute one activity call with the runtime's retry policy.
    ///
    /// `attempt` is invoked once per try. Transient failures are retried with
    /// exponential backoff until the start-to-close budget is exhausted;
    /// permanent and fatal failures surface immediately for the workflow to
    /// branch on.
    pub async fn execute_activity<T, F, Fut>(
        &self,
        name: &str,
        mut attempt: F,
    ) -> Result<T, WorkflowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let policy = &self.inner.retry;
        let budget_secs = policy.start_to_close.as_secs();
        let started = tokio::time::Instant::now();
        let mut retries: u32 = 0;

        loop {
            let Some(remaining) = policy.start_to_close.checked_sub(started.elapsed()) else {
                return Err(WorkflowError::ActivityTimeout {
                    name: name.to_string(),
                    budget_secs,
                });
            };

            match tokio::time::timeout(remaining, attempt()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if err.is_retryable() => {
                    retries += 1;
                    let delay = policy.delay_for_attempt(retries);
                    if started.elapsed() + delay >= policy.start_to_close {
                        return Err(WorkflowError::Activity {
                            name: name.to_string(),
                            source: err,
                        });
                    }
                    warn!(
                        instance_id = %self.instance_id,
                        activity = name,
                        retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient activity failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(Err(err)) => {
                    return Err(WorkflowError::Activity {
                        name: name.to_string(),
                        source: err,
                    });
                }
                Err(_) => {
                    return Err(WorkflowError::ActivityTimeout {
                        name: name.to_string(),
                        budget_secs,
                    });
                }
            }
        }
    }

    /// Start a child workflow (or join a running instance with the same
    /// deterministic ID) and await its completion.
    pub async fn execute_child<F, Fut>(
        &self,
        child_id: &str,
        kind: &str,
        body: F,
    ) -> Result<(), WorkflowError>
    where
        F: FnOnce(WorkflowCtx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), WorkflowError>> + Send + 'static,
    {
        let (outcome, done_rx) = self
            .inner
            .start(child_id, kind, body)
            .await
            .map_err(|e| WorkflowError::Logic(format!("failed to start child: {}", e)))?;
        if outcome == StartOutcome::AlreadyRunning {
            debug!(
                parent = %self.instance_id,
                child = child_id,
                "child already running, joining existing instance"
            );
        }
        await_done(done_rx)
            .await
            .map_err(|reason| WorkflowError::ChildFailed {
                instance_id: child_id.to_string(),
                reason,
            })
    }
}
