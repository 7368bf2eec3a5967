//! Sessions: per-connection state, visibility overrides, and liveness.
//!
//! A [`Session`] carries a key-value state store scoped to one
//! connection, an optional copy-on-write visibility override layered over
//! the server-level filter, and a liveness token that cancels when the
//! connection dies. [`Session::supervise`] races any in-flight future
//! against liveness so a dead session never leaves a caller blocked.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::visibility::VisibilityFilter;

/// One client connection's scope.
pub struct Session {
    id: String,
    state: DashMap<String, Value>,
    visibility: RwLock<Option<Arc<VisibilityFilter>>>,
    liveness: CancellationToken,
}

impl Session {
    /// Creates a session with an explicit ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: DashMap::new(),
            visibility: RwLock::new(None),
            liveness: CancellationToken::new(),
        }
    }

    /// Creates a session with a generated UUID.
    pub fn anonymous() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// The session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Reads a state value.
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.state.get(key).map(|entry| entry.value().clone())
    }

    /// Writes a state value.
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    /// Removes a state value, returning it if present.
    pub fn remove_state(&self, key: &str) -> Option<Value> {
        self.state.remove(key).map(|(_, value)| value)
    }

    /// The session-level visibility override, if one exists.
    pub fn visibility_override(&self) -> Option<Arc<VisibilityFilter>> {
        self.visibility.read().clone()
    }

    /// The filter governing this session: its override if present, else
    /// the server-level filter.
    pub fn effective_visibility(&self, server: &Arc<VisibilityFilter>) -> Arc<VisibilityFilter> {
        self.visibility_override()
            .unwrap_or_else(|| Arc::clone(server))
    }

    /// The override filter, created on first use as a copy of the
    /// server-level filter. Later server-level changes do not leak into a
    /// session that has diverged.
    fn override_filter(&self, base: &VisibilityFilter) -> Arc<VisibilityFilter> {
        if let Some(filter) = self.visibility.read().clone() {
            return filter;
        }
        let mut slot = self.visibility.write();
        match &*slot {
            Some(filter) => Arc::clone(filter),
            None => {
                let filter = Arc::new(base.clone());
                *slot = Some(Arc::clone(&filter));
                filter
            }
        }
    }

    /// Disables keys/tags for this session only.
    pub fn disable<K, T>(&self, base: &VisibilityFilter, keys: K, tags: T)
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        self.override_filter(base).disable(keys, tags);
    }

    /// Enables keys/tags for this session only.
    pub fn enable<K, T>(&self, base: &VisibilityFilter, keys: K, tags: T)
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        self.override_filter(base).enable(keys, tags);
    }

    /// Switches this session to allowlist-only visibility.
    pub fn enable_only<K, T>(&self, base: &VisibilityFilter, keys: K, tags: T)
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        self.override_filter(base).enable_only(keys, tags);
    }

    /// Drops the session override; the server-level filter applies again.
    pub fn reset_visibility(&self) {
        *self.visibility.write() = None;
    }

    /// The liveness token. Cancelled exactly once, on [`close`](Self::close).
    pub fn liveness(&self) -> &CancellationToken {
        &self.liveness
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.liveness.is_cancelled()
    }

    /// Closes the session: cancels liveness and clears state.
    pub fn close(&self) {
        self.liveness.cancel();
        self.state.clear();
    }

    /// Races `fut` against session liveness.
    ///
    /// If the session dies while the future is pending, resolves to
    /// [`Error::SessionClosed`]. When both are ready the future's own
    /// result wins, so a response that raced the disconnect is still
    /// delivered.
    pub async fn supervise<F>(&self, fut: F) -> Result<F::Output>
    where
        F: std::future::Future,
    {
        tokio::select! {
            biased;
            out = fut => Ok(out),
            () = self.liveness.cancelled() => Err(Error::SessionClosed {
                session_id: self.id.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("has_override", &self.visibility_override().is_some())
            .finish()
    }
}

/// Tracks live sessions by ID.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session with a generated ID.
    pub fn open(&self) -> Arc<Session> {
        let session = Arc::new(Session::anonymous());
        self.sessions
            .insert(session.id().to_string(), Arc::clone(&session));
        session
    }

    /// Looks up a live session.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Closes and removes a session. Returns whether it was present.
    pub fn disconnect(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.close();
                tracing::debug!(session_id = id, "session disconnected");
                true
            }
            None => false,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
