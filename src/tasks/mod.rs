//! Background task execution (SEP-1686).
//!
//! A task-augmented call is recorded as a [`Task`], executed through a
//! pluggable [`TaskBackend`], and polled by the client until a terminal
//! state. Tasks are session-scoped: a task submitted by one session is
//! invisible to every other session, and a lookup across that boundary is
//! indistinguishable from a miss.
//!
//! In-tree backends: [`InMemoryTaskBackend`] (spawn-per-task, single
//! process) and [`QueueTaskBackend`] (bounded work queue with a worker
//! pool per routing key). Both honor identical lifecycle, TTL, and
//! isolation semantics. [`TaskManager`] sits above the backend and
//! enforces per-component task-mode policy.

mod backend;
mod manager;
mod memory;
mod queue;
mod table;

pub use backend::{SubmitRequest, TaskBackend, TaskContext, TaskHandler};
pub use manager::{CallOutcome, TaskManager, TaskOptions};
pub use memory::InMemoryTaskBackend;
pub use queue::QueueTaskBackend;
pub use table::{ProgressSink, TaskTable};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Task lifecycle states.
///
/// ```text
/// submitted ──► working ──► completed
///     │            ├──────► failed
///     └────────────┴──────► cancelled
/// ```
///
/// Terminal states accept no further transitions, and a task never moves
/// backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued, not yet picked up by a worker.
    Submitted,
    /// Executing.
    Working,
    /// Finished successfully; result retained until TTL expiry.
    Completed,
    /// Handler raised; error payload retained until TTL expiry.
    Failed,
    /// Cancelled before producing a result.
    Cancelled,
}

impl TaskStatus {
    /// Whether this state accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition to `to` is legal.
    pub fn can_transition_to(&self, to: Self) -> bool {
        match self {
            Self::Submitted => matches!(to, Self::Working | Self::Cancelled),
            Self::Working => matches!(to, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }

    /// Validates a transition, returning [`Error::InvalidTransition`] on
    /// an illegal one.
    pub fn validate_transition(&self, task_id: &str, to: Self) -> Result<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                task_id: task_id.to_string(),
                from: *self,
                to,
            })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Progress snapshot reported by a running handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Units of work done so far.
    pub current: u64,
    /// Total units, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Free-form progress message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Wire representation of a task, returned from submission and every
/// status poll.
///
/// `ttl` is the server-effective retention window and is serialized even
/// when null, so clients can distinguish "no retention limit" from an
/// omitted field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique within the owning session.
    pub task_id: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Human-readable note about the current state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Last state or progress change.
    pub last_updated_at: DateTime<Utc>,
    /// Server-effective result retention window in milliseconds.
    pub ttl: Option<u64>,
    /// Suggested client poll interval in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
    /// Latest reported progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

impl Task {
    pub(crate) fn new(
        task_id: String,
        status: TaskStatus,
        ttl: Option<u64>,
        poll_interval: Option<u64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status,
            status_message: None,
            created_at: now,
            last_updated_at: now,
            ttl,
            poll_interval,
            progress: None,
        }
    }
}

/// Result of a task-augmented call: the created task, plus whether the
/// response was resolved synchronously (a forbidden-mode conflict never
/// leaves a hanging task).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResult {
    /// The created (or immediately resolved) task.
    pub task: Task,
    /// Whether the outcome was delivered without backgrounding.
    #[serde(default)]
    pub returned_immediately: bool,
}

/// Client-supplied task metadata on a call request. Presence of this
/// struct is what requests background execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMeta {
    /// Requested result retention window in milliseconds. The server's
    /// own window takes precedence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Caller-chosen task ID, unique within the session. Generated when
    /// absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl TaskMeta {
    /// Metadata with no TTL request and a server-generated ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the requested TTL.
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    /// Sets a caller-chosen task ID.
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_accept_nothing() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for to in [
                TaskStatus::Submitted,
                TaskStatus::Working,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn happy_path_transitions() {
        assert!(TaskStatus::Submitted.can_transition_to(TaskStatus::Working));
        assert!(TaskStatus::Working.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Working.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Working.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Submitted.can_transition_to(TaskStatus::Cancelled));
    }

    #[test]
    fn no_backward_or_skip_transitions() {
        assert!(!TaskStatus::Working.can_transition_to(TaskStatus::Submitted));
        assert!(!TaskStatus::Submitted.can_transition_to(TaskStatus::Completed));
        let err = TaskStatus::Submitted
            .validate_transition("t1", TaskStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn task_serializes_ttl_even_when_null() {
        let task = Task::new("t1".into(), TaskStatus::Working, None, Some(5_000));
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.as_object().unwrap().contains_key("ttl"));
        assert!(json["ttl"].is_null());
        assert_eq!(json["taskId"], "t1");
        assert_eq!(json["status"], "working");
        assert_eq!(json["pollInterval"], 5_000);
    }

    #[test]
    fn status_wire_values_are_lowercase() {
        assert_eq!(
            serde_json::to_value(TaskStatus::Submitted).unwrap(),
            serde_json::json!("submitted")
        );
        assert_eq!(
            serde_json::to_value(TaskStatus::Cancelled).unwrap(),
            serde_json::json!("cancelled")
        );
    }
}
