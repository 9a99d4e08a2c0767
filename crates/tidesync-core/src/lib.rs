// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Minimal durable-execution substrate for connector syncs.
//!
//! This crate provides the durable-execution contract the sync orchestration
//! needs and nothing more:
//!
//! - **Workflow identity**: every instance is addressed by a deterministic ID;
//!   starting an ID that is already running is a no-op-with-notification, which
//!   is how at-most-one-active-sync-per-entity is guaranteed without locks.
//! - **Signals**: out-of-band messages delivered to running instances in send
//!   order, with a `signal_with_start` bootstrap for long-lived actors.
//! - **Child workflows**: started and awaited by a parent for fan-out.
//! - **Activity retry**: transient failures are retried with exponential
//!   backoff inside a start-to-close budget (reference: 10 minutes); permanent
//!   failures surface as typed results for the workflow to branch on.
//! - **Persistence**: instance lifecycle plus an append-only event log
//!   (SQLite via sqlx). Resumption cursors live with the caller, scoped by
//!   workflow identity.
//!
//! Workflow bodies run as plain async functions over a [`runtime::WorkflowCtx`];
//! all non-deterministic work (network, clock, randomness) belongs inside
//! activities invoked through the context.

pub mod config;
pub mod error;
pub mod persistence;
pub mod retry;
pub mod runtime;

pub use config::{Config, ConfigError};
pub use error::{ActivityError, CoreError, WorkflowError};
pub use retry::{RetryPolicy, RetryStrategy};
pub use runtime::{SignalEnvelope, SignalWait, StartOutcome, SyncRuntime, WorkflowCtx};
