//! Task backend contract.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::tasks::{ProgressSink, Task, TaskStatus};

/// Execution context a backend hands to a registered handler.
pub struct TaskContext {
    /// Progress reporting into the task record.
    pub progress: ProgressSink,
    /// Fires when the task is cancelled. Handlers should observe it at
    /// their own pace; cancellation is best-effort.
    pub cancel: CancellationToken,
}

/// A handler registered under a routing key. Receives the submitted
/// payload and a [`TaskContext`].
pub type TaskHandler =
    std::sync::Arc<dyn Fn(Value, TaskContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A task submission.
#[derive(Clone)]
pub struct SubmitRequest {
    /// Selects the registered handler (derived from the component's kind
    /// and name).
    pub routing_key: String,
    /// Handler input, JSON all the way down so a durable backend can ship
    /// it across processes.
    pub payload: Value,
    /// The owning session's ID.
    pub owner: String,
    /// Caller-chosen task ID; generated when absent.
    pub task_id: Option<String>,
    /// Server-effective retention window in milliseconds.
    pub ttl: Option<u64>,
    /// Suggested poll interval in milliseconds.
    pub poll_interval: Option<u64>,
}

/// Pluggable task execution backend.
///
/// Implementations must honor identical lifecycle, TTL, and
/// session-isolation semantics so deployments can swap the in-memory
/// backend for a queue-based one without behavior changes. All task
/// lookups are scoped by `owner`; a cross-owner lookup misses exactly
/// like an unknown ID.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Registers (or replaces) the handler for a routing key.
    fn register(&self, routing_key: &str, handler: TaskHandler);

    /// Accepts a task and returns its initial wire state. Must return
    /// promptly; execution happens out of band.
    async fn submit(&self, request: SubmitRequest) -> Result<Task>;

    /// Current state of a task: status, server-effective TTL, latest
    /// progress.
    async fn get_status(&self, owner: &str, task_id: &str) -> Result<Task>;

    /// Best-effort cancellation; returns the state that actually stuck.
    async fn cancel(&self, owner: &str, task_id: &str) -> Result<Task>;

    /// Blocks until terminal or `timeout` elapses, returning the state at
    /// that moment. The timeout never cancels the task.
    async fn wait(&self, owner: &str, task_id: &str, timeout: Option<Duration>) -> Result<Task> {
        self.wait_until(owner, task_id, timeout, None).await
    }

    /// Like [`wait`](Self::wait), but also returns as soon as the task
    /// reaches the given intermediate state.
    async fn wait_until(
        &self,
        owner: &str,
        task_id: &str,
        timeout: Option<Duration>,
        until: Option<TaskStatus>,
    ) -> Result<Task>;

    /// Blocks until terminal and returns the result payload, re-raising a
    /// failed task's captured error.
    async fn get_result(
        &self,
        owner: &str,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Value>;

    /// Live tasks for a session.
    async fn list(&self, owner: &str) -> Result<Vec<Task>>;
}
