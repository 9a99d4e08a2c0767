// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connector orchestration on top of the tidesync durable substrate.
//!
//! This crate keeps external data sources mirrored into a local store and a
//! downstream content index. Three trigger paths feed it:
//!
//! - scheduled or manual **full syncs**, one sequential child per container
//! - **webhooks** for individual message changes, debounced per entity
//! - **membership events**, queued and synced one container at a time
//!
//! plus a periodic **garbage collector** that removes containers deleted
//! upstream. All orchestration state lives behind deterministic workflow
//! IDs, so every trigger path is safe to fire redundantly.
//!
//! [`dispatcher::SyncDispatcher`] is the only type transport layers need;
//! the [`source`], [`store`] and [`index`] traits are the seams provider
//! and storage implementations plug into.

pub mod dispatcher;
pub mod index;
pub mod slack;
pub mod source;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use dispatcher::{DispatchError, MessageRef, SyncDispatcher};
pub use index::{ContentIndex, IndexDocument, IndexError};
pub use source::{RetryingClient, SourceClient, SourceError};
pub use store::{MirrorStore, StoreError, sqlite::SqliteMirrorStore};
