//! Shared task record store.
//!
//! Records are keyed `{owner}:{task_id}` so session isolation falls out
//! of key construction: a lookup from the wrong session misses exactly
//! like a lookup for a task that never existed. Terminal records stay
//! retrievable until their TTL elapses, then evict lazily on the next
//! read.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorPayload, Result};
use crate::tasks::{Progress, Task, TaskStatus};

fn make_key(owner: &str, task_id: &str) -> String {
    format!("{owner}:{task_id}")
}

struct TaskEntry {
    task: Task,
    result: Option<Value>,
    error: Option<ErrorPayload>,
    expires_at: Option<Instant>,
    cancel: CancellationToken,
    status_tx: watch::Sender<TaskStatus>,
}

impl TaskEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Owner-keyed task records shared by the in-process backends.
#[derive(Default)]
pub struct TaskTable {
    records: DashMap<String, TaskEntry>,
}

impl TaskTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh record. The caller-chosen task ID must be unique
    /// within the owning session.
    pub fn insert(
        &self,
        owner: &str,
        task_id: &str,
        initial: TaskStatus,
        ttl: Option<u64>,
        poll_interval: Option<u64>,
    ) -> Result<(Task, CancellationToken)> {
        let key = make_key(owner, task_id);
        let task = Task::new(task_id.to_string(), initial, ttl, poll_interval);
        let cancel = CancellationToken::new();
        let (status_tx, _) = watch::channel(initial);
        let entry = TaskEntry {
            task: task.clone(),
            result: None,
            error: None,
            expires_at: None,
            cancel: cancel.clone(),
            status_tx,
        };
        match self.records.entry(key) {
            dashmap::Entry::Occupied(_) => Err(Error::Validation {
                component: format!("task:{task_id}"),
                message: "task ID already in use for this session".to_string(),
            }),
            dashmap::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok((task, cancel))
            }
        }
    }

    /// Current wire state of a task. A wrong owner, an unknown ID, and an
    /// evicted record all miss identically.
    pub fn get(&self, owner: &str, task_id: &str) -> Result<Task> {
        let key = make_key(owner, task_id);
        let now = Instant::now();
        let expired = match self.records.get(&key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => return Ok(entry.task.clone()),
            None => false,
        };
        if expired {
            self.records.remove(&key);
        }
        Err(Error::NotFound {
            key: task_id.to_string(),
        })
    }

    /// All live tasks for a session.
    pub fn list(&self, owner: &str) -> Vec<Task> {
        let prefix = format!("{owner}:");
        let now = Instant::now();
        self.records
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix) && !entry.is_expired(now))
            .map(|entry| entry.task.clone())
            .collect()
    }

    /// Number of non-terminal tasks for a session.
    pub fn active_count(&self, owner: &str) -> usize {
        self.list(owner)
            .iter()
            .filter(|t| !t.status.is_terminal())
            .count()
    }

    /// Drops a record outright, as if the submission never happened.
    /// Used when a submission is rejected after its record was inserted;
    /// the ID becomes immediately reusable.
    pub fn remove(&self, owner: &str, task_id: &str) {
        self.records.remove(&make_key(owner, task_id));
    }

    /// The cancellation token wired into a task's handler.
    pub fn cancel_token(&self, owner: &str, task_id: &str) -> Option<CancellationToken> {
        self.records
            .get(&make_key(owner, task_id))
            .map(|entry| entry.cancel.clone())
    }

    fn mutate<F>(&self, owner: &str, task_id: &str, f: F) -> Result<Task>
    where
        F: FnOnce(&mut TaskEntry) -> Result<()>,
    {
        let key = make_key(owner, task_id);
        let mut entry = self.records.get_mut(&key).ok_or_else(|| Error::NotFound {
            key: task_id.to_string(),
        })?;
        f(&mut entry)?;
        entry.task.last_updated_at = Utc::now();
        Ok(entry.task.clone())
    }

    fn transition_entry(entry: &mut TaskEntry, to: TaskStatus) -> Result<()> {
        entry.task.status.validate_transition(&entry.task.task_id, to)?;
        entry.task.status = to;
        if to.is_terminal() {
            entry.expires_at = entry
                .task
                .ttl
                .map(|ttl| Instant::now() + Duration::from_millis(ttl));
        }
        // Waiters observe the new state; a lagging receiver only ever
        // skips intermediate states, never the terminal one.
        let _ = entry.status_tx.send(to);
        Ok(())
    }

    /// Transitions a task, enforcing the state machine.
    pub fn transition(&self, owner: &str, task_id: &str, to: TaskStatus) -> Result<Task> {
        self.mutate(owner, task_id, |entry| Self::transition_entry(entry, to))
    }

    /// Marks a task completed with its result. Loses quietly to an
    /// earlier terminal state (a cancel that landed first).
    pub fn try_complete(&self, owner: &str, task_id: &str, result: Value) -> Result<Task> {
        match self.mutate(owner, task_id, |entry| {
            Self::transition_entry(entry, TaskStatus::Completed)?;
            entry.result = Some(result);
            Ok(())
        }) {
            Err(Error::InvalidTransition { .. }) => self.get(owner, task_id),
            other => other,
        }
    }

    /// Marks a task failed with its error payload. Loses quietly to an
    /// earlier terminal state.
    pub fn try_fail(&self, owner: &str, task_id: &str, error: ErrorPayload) -> Result<Task> {
        match self.mutate(owner, task_id, |entry| {
            Self::transition_entry(entry, TaskStatus::Failed)?;
            entry.task.status_message = Some(error.message.clone());
            entry.error = Some(error);
            Ok(())
        }) {
            Err(Error::InvalidTransition { .. }) => self.get(owner, task_id),
            other => other,
        }
    }

    /// Best-effort cancellation: fires the task's cancellation token and
    /// moves it to `cancelled` unless a terminal state already landed, in
    /// which case that state is returned untouched.
    pub fn cancel(&self, owner: &str, task_id: &str) -> Result<Task> {
        if let Some(token) = self.cancel_token(owner, task_id) {
            token.cancel();
        }
        match self.mutate(owner, task_id, |entry| {
            Self::transition_entry(entry, TaskStatus::Cancelled)
        }) {
            Err(Error::InvalidTransition { .. }) => self.get(owner, task_id),
            other => other,
        }
    }

    /// Updates the latest progress snapshot. The running handler is the
    /// single writer; pollers read consistent copies.
    pub fn report_progress(&self, owner: &str, task_id: &str, progress: Progress) {
        let _ = self.mutate(owner, task_id, |entry| {
            entry.task.progress = Some(progress);
            Ok(())
        });
    }

    /// Blocks until the task reaches a terminal state or `timeout`
    /// elapses, returning the task's state at that moment. The timeout is
    /// polling patience only; the task keeps running.
    pub async fn wait(
        &self,
        owner: &str,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Task> {
        self.wait_until(owner, task_id, timeout, None).await
    }

    /// Like [`wait`](Self::wait), but also returns as soon as the task
    /// reaches the given intermediate state.
    pub async fn wait_until(
        &self,
        owner: &str,
        task_id: &str,
        timeout: Option<Duration>,
        until: Option<TaskStatus>,
    ) -> Result<Task> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut rx = {
            let key = make_key(owner, task_id);
            let entry = self.records.get(&key).ok_or_else(|| Error::NotFound {
                key: task_id.to_string(),
            })?;
            entry.status_tx.subscribe()
        };
        loop {
            let status = *rx.borrow();
            if status.is_terminal() || until == Some(status) {
                return self.get(owner, task_id);
            }
            let changed = rx.changed();
            let outcome = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, changed).await {
                    Ok(outcome) => outcome,
                    // Patience exhausted: report the current state.
                    Err(_) => return self.get(owner, task_id),
                },
                None => changed.await,
            };
            if outcome.is_err() {
                // Record evicted while waiting.
                return self.get(owner, task_id);
            }
        }
    }

    /// Blocks until terminal and returns the result payload. A failed
    /// task re-raises its captured error; a cancelled task raises too.
    /// On timeout before a terminal state, raises [`Error::NotReady`].
    pub async fn result(
        &self,
        owner: &str,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let task = self.wait(owner, task_id, timeout).await?;
        match task.status {
            TaskStatus::Completed => {
                let key = make_key(owner, task_id);
                self.records
                    .get(&key)
                    .and_then(|entry| entry.result.clone())
                    .ok_or_else(|| Error::NotFound {
                        key: task_id.to_string(),
                    })
            }
            TaskStatus::Failed => {
                let key = make_key(owner, task_id);
                let payload = self
                    .records
                    .get(&key)
                    .and_then(|entry| entry.error.clone())
                    .unwrap_or_else(|| ErrorPayload {
                        kind: "handler".to_string(),
                        code: -32603,
                        message: "task failed".to_string(),
                    });
                Err(payload.into_error())
            }
            TaskStatus::Cancelled => Err(Error::Handler {
                component: format!("task:{task_id}"),
                message: "task was cancelled before completion".to_string(),
            }),
            TaskStatus::Submitted | TaskStatus::Working => Err(Error::NotReady {
                task_id: task_id.to_string(),
            }),
        }
    }
}

/// Handle given to a running handler for progress reporting. Writes land
/// in the task record; concurrent status polls observe the latest
/// snapshot.
#[derive(Clone)]
pub struct ProgressSink {
    table: std::sync::Arc<TaskTable>,
    owner: String,
    task_id: String,
}

impl ProgressSink {
    pub(crate) fn new(
        table: std::sync::Arc<TaskTable>,
        owner: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            table,
            owner: owner.into(),
            task_id: task_id.into(),
        }
    }

    /// Records a progress snapshot.
    pub fn report(&self, current: u64, total: Option<u64>, message: Option<&str>) {
        self.table.report_progress(
            &self.owner,
            &self.task_id,
            Progress {
                current,
                total,
                message: message.map(str::to_string),
            },
        );
    }
}
