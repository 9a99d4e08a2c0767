// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External source client boundary.
//!
//! Providers (Slack, Google Drive) are consumed through [`SourceClient`], a
//! narrow paginated-listing/fetch interface. Production implementations wrap
//! a provider SDK; the orchestration core only sees this trait.
//!
//! [`RetryingClient`] is the explicit decorator replacing the original
//! dynamic-proxy wrapping: it translates raw HTTP failures into the typed
//! error taxonomy (503-class becomes "upstream unavailable") and performs one
//! quick in-place retry before the activity-level retry policy takes over.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tidesync_core::ActivityError;

/// A container entity (channel) visible to the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Stable external identifier.
    pub id: String,
    /// Display name. Absent names are a provider-side anomaly the
    /// orchestration treats as fatal for that container's sync run.
    pub name: Option<String>,
}

/// One message as returned by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    /// Source timestamp, also the message's identifier within a container.
    pub ts: String,
    /// Parent thread timestamp if the message belongs to a thread.
    pub thread_ts: Option<String>,
    /// Author external ID.
    pub author: String,
    /// Message body.
    pub text: String,
}

impl SourceMessage {
    /// Whether this message lives in a thread (replies and thread parents).
    pub fn is_threaded(&self) -> bool {
        self.thread_ts.is_some()
    }
}

/// One page of a container listing.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    /// Messages in this page, oldest first.
    pub messages: Vec<SourceMessage>,
    /// Opaque cursor for the next page; `None` means exhaustion.
    pub next_cursor: Option<String>,
}

/// A user in the source's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUser {
    /// Stable external identifier.
    pub id: String,
    /// Display name.
    pub display_name: String,
}

/// Typed failures from the source boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The upstream service is down (503-class). Retryable.
    #[error("upstream is down: {0}")]
    UpstreamUnavailable(String),

    /// The upstream asked us to back off. Retryable.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Suggested backoff in seconds.
        retry_after_secs: u64,
    },

    /// The requested object does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),

    /// The connector's credential cannot see the object.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Raw transport-level failure, produced only by undecorated clients.
    /// [`RetryingClient`] translates this into one of the typed variants.
    #[error("http {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or transport message.
        message: String,
    },

    /// Any other provider API error.
    #[error("source api error: {0}")]
    Api(String),
}

impl SourceError {
    fn is_transient_http(&self) -> bool {
        matches!(self, SourceError::Http { status, .. } if *status == 429 || (500..=599).contains(status))
    }

    fn translate_http(self) -> SourceError {
        match self {
            SourceError::Http { status, message } if (500..=599).contains(&status) => {
                SourceError::UpstreamUnavailable(format!("http {}: {}", status, message))
            }
            SourceError::Http { status: 429, .. } => SourceError::RateLimited {
                retry_after_secs: 30,
            },
            other => other,
        }
    }
}

/// Map source failures into the activity taxonomy.
///
/// Unavailable/rate-limited upstreams are transient (the activity retry
/// policy handles them); missing objects and revoked permissions are
/// permanent typed results the workflow branches on. Raw HTTP statuses
/// split the same way: 429 and the 500 range are worth retrying, any other
/// 400-class status means the request itself is wrong and retrying cannot
/// fix it. Unclassified API errors are treated as transient, matching the
/// original behavior of rethrowing into the activity retry loop.
impl From<SourceError> for ActivityError {
    fn from(err: SourceError) -> Self {
        match &err {
            SourceError::UpstreamUnavailable(_)
            | SourceError::RateLimited { .. }
            | SourceError::Api(_) => ActivityError::transient(err.to_string()),
            SourceError::Http { status, .. }
                if *status == 429 || (500..=599).contains(status) =>
            {
                ActivityError::transient(err.to_string())
            }
            SourceError::Http { .. }
            | SourceError::NotFound(_)
            | SourceError::PermissionDenied(_) => ActivityError::permanent(err.to_string()),
        }
    }
}

/// Thin polymorphic wrapper over one provider's API.
///
/// Implementations must be safe to call concurrently; rate limiting beyond
/// the single in-place retry is the caller's concern.
#[async_trait::async_trait]
pub trait SourceClient: Send + Sync {
    /// List container entities (channels), paginating internally to exhaustion.
    async fn list_containers(&self, joined_only: bool) -> Result<Vec<ContainerInfo>, SourceError>;

    /// Fetch one container, `Ok(None)` if it no longer exists upstream.
    async fn fetch_container(&self, container_id: &str)
    -> Result<Option<ContainerInfo>, SourceError>;

    /// Fetch one page of messages from a container.
    ///
    /// `oldest_ts_ms` bounds the range from below; `cursor` resumes a prior
    /// listing and takes precedence over the bound.
    async fn list_page(
        &self,
        container_id: &str,
        oldest_ts_ms: Option<i64>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<MessagePage, SourceError>;

    /// Fetch all replies of one thread, oldest first.
    async fn list_replies(
        &self,
        container_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<SourceMessage>, SourceError>;

    /// Ensure the integration is a member of the container. Idempotent.
    async fn join_container(&self, container_id: &str) -> Result<(), SourceError>;

    /// List the full user directory.
    async fn list_users(&self) -> Result<Vec<SourceUser>, SourceError>;
}

/// One-shot in-place retry plus HTTP error translation, applied uniformly.
macro_rules! retry_once {
    ($self:ident, $call:expr) => {{
        match $call {
            Err(err) if err.is_transient_http() => {
                tracing::warn!(error = %err, "transient upstream failure, retrying once");
                tokio::time::sleep($self.retry_delay).await;
                $call.map_err(SourceError::translate_http)
            }
            other => other.map_err(SourceError::translate_http),
        }
    }};
}

/// Decorator adding error translation and a single quick retry to any
/// [`SourceClient`].
///
/// This is the explicit-interface replacement for the original reflection
/// proxy: it implements the same capability interface as the raw client and
/// callers hold it as an `Arc<dyn SourceClient>` like any other.
pub struct RetryingClient {
    inner: Arc<dyn SourceClient>,
    retry_delay: Duration,
}

impl RetryingClient {
    /// Wrap a raw client with the default 1-second in-place retry delay.
    pub fn new(inner: Arc<dyn SourceClient>) -> Self {
        Self {
            inner,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Wrap a raw client with a custom in-place retry delay.
    pub fn with_retry_delay(inner: Arc<dyn SourceClient>, retry_delay: Duration) -> Self {
        Self { inner, retry_delay }
    }
}

#[async_trait::async_trait]
impl SourceClient for RetryingClient {
    async fn list_containers(&self, joined_only: bool) -> Result<Vec<ContainerInfo>, SourceError> {
        retry_once!(self, self.inner.list_containers(joined_only).await)
    }

    async fn fetch_container(
        &self,
        container_id: &str,
    ) -> Result<Option<ContainerInfo>, SourceError> {
        retry_once!(self, self.inner.fetch_container(container_id).await)
    }

    async fn list_page(
        &self,
        container_id: &str,
        oldest_ts_ms: Option<i64>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<MessagePage, SourceError> {
        retry_once!(
            self,
            self.inner
                .list_page(container_id, oldest_ts_ms, cursor, limit)
                .await
        )
    }

    async fn list_replies(
        &self,
        container_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<SourceMessage>, SourceError> {
        retry_once!(self, self.inner.list_replies(container_id, thread_ts).await)
    }

    async fn join_container(&self, container_id: &str) -> Result<(), SourceError> {
        retry_once!(self, self.inner.join_container(container_id).await)
    }

    async fn list_users(&self) -> Result<Vec<SourceUser>, SourceError> {
        retry_once!(self, self.inner.list_users().await)
    }
}
