// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// tidesync runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection path for the substrate's instance/event log.
    pub core_database_path: String,
    /// SQLite connection path for the connector mirror store.
    pub mirror_database_path: String,
    /// Start-to-close budget for one activity call.
    pub activity_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `TIDESYNC_CORE_DB`: substrate database path (default: `.data/core.db`)
    /// - `TIDESYNC_MIRROR_DB`: mirror store database path (default: `.data/mirror.db`)
    /// - `TIDESYNC_ACTIVITY_TIMEOUT_SECS`: activity start-to-close budget (default: 600)
    pub fn from_env() -> Result<Self, ConfigError> {
        let core_database_path =
            std::env::var("TIDESYNC_CORE_DB").unwrap_or_else(|_| ".data/core.db".to_string());

        let mirror_database_path =
            std::env::var("TIDESYNC_MIRROR_DB").unwrap_or_else(|_| ".data/mirror.db".to_string());

        let activity_timeout_secs: u64 = std::env::var("TIDESYNC_ACTIVITY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "600".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("TIDESYNC_ACTIVITY_TIMEOUT_SECS", "must be a positive integer")
            })?;

        Ok(Self {
            core_database_path,
            mirror_database_path,
            activity_timeout: Duration::from_secs(activity_timeout_secs),
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
