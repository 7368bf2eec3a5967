//! Per-call context handed to component handlers.
//!
//! A [`RequestContext`] carries the calling session, an optional handle
//! back to the resolved catalog (used by synthetic tools such as the
//! search and code-mode entry points), a cancellation token, and an
//! optional progress sink when the call runs as a background task.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::session::Session;
use crate::tasks::ProgressSink;

/// Context for a single component invocation.
///
/// Cloning is cheap; everything inside is reference-counted.
#[derive(Clone)]
pub struct RequestContext {
    session: Arc<Session>,
    catalog: Option<Arc<crate::catalog::Catalog>>,
    cancel: CancellationToken,
    progress: Option<ProgressSink>,
}

impl RequestContext {
    /// Builds a context for a call made within `session` against
    /// `catalog`.
    pub fn new(session: Arc<Session>, catalog: Arc<crate::catalog::Catalog>) -> Self {
        let cancel = session.liveness().child_token();
        Self {
            session,
            catalog: Some(catalog),
            cancel,
            progress: None,
        }
    }

    /// A standalone context with a fresh anonymous session and no catalog.
    /// Intended for direct handler invocation in tests.
    pub fn detached() -> Self {
        Self {
            session: Arc::new(Session::anonymous()),
            catalog: None,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Attaches a progress sink. Done by the task backend before a
    /// backgrounded handler starts.
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Replaces the cancellation token. Done by the task backend so a
    /// task cancel reaches the handler.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The calling session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The resolved catalog this call was dispatched through.
    ///
    /// Synthetic handlers use this for re-entrant catalog reads (the
    /// catalog-bypass transform keeps those reads from recursing through
    /// the transform that created them).
    pub fn catalog(&self) -> Result<&Arc<crate::catalog::Catalog>> {
        self.catalog
            .as_ref()
            .ok_or_else(|| Error::internal("no catalog attached to this context"))
    }

    /// Whether the caller has requested cancellation (task cancel or
    /// session death).
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the caller requests cancellation.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// The cancellation token for this call.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Reports task progress. A no-op for synchronous calls.
    pub fn report_progress(&self, current: u64, total: Option<u64>, message: Option<&str>) {
        if let Some(sink) = &self.progress {
            sink.report(current, total, message);
        }
    }

    /// Reads a session-state value.
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.session.get_state(key)
    }

    /// Writes a session-state value.
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.session.set_state(key, value);
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("session", &self.session.id())
            .field("has_catalog", &self.catalog.is_some())
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}
