//! Task-mode policy and the sync-versus-background decision.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::component::{Component, TaskMode, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TTL_MS};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::session::{Session, SessionRegistry};
use crate::tasks::{
    CreateTaskResult, SubmitRequest, Task, TaskBackend, TaskHandler, TaskMeta, TaskStatus,
};

/// Server-wide task policy knobs.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Server-global retention window. When set it overrides any
    /// client-requested TTL and is reported verbatim in every status
    /// response.
    pub server_ttl: Option<u64>,
    /// Retention window applied when neither server nor client names one.
    pub default_ttl: u64,
    /// Poll interval suggested on created tasks, in milliseconds.
    pub default_poll_interval: u64,
    /// Cap on concurrently active (non-terminal) tasks per session.
    pub max_tasks_per_session: Option<usize>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            server_ttl: None,
            default_ttl: DEFAULT_TTL_MS,
            default_poll_interval: DEFAULT_POLL_INTERVAL_MS,
            max_tasks_per_session: None,
        }
    }
}

/// Outcome of a component call: a direct result, or a task handle.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// Synchronous execution finished; here is the result.
    Completed(Value),
    /// A task was created (or, on a forbidden-mode conflict, resolved on
    /// the spot with `returned_immediately` set).
    Task(CreateTaskResult),
}

/// Enforces per-component task policy above a [`TaskBackend`].
pub struct TaskManager {
    backend: Arc<dyn TaskBackend>,
    options: TaskOptions,
}

impl TaskManager {
    /// Creates a manager over a backend.
    pub fn new(backend: Arc<dyn TaskBackend>, options: TaskOptions) -> Self {
        Self { backend, options }
    }

    /// The policy in force.
    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    /// Registers a component's handler with the backend under its routing
    /// key (`kind:name`). Safe to call again for an updated component.
    ///
    /// The payload shipped to the backend is pure JSON
    /// (`{"arguments", "session"}`) so a distributed backend can carry it
    /// across processes; the handler re-resolves the session on its side
    /// and falls back to an anonymous one if the session is gone.
    pub fn register_component(
        &self,
        component: &Component,
        catalog: Arc<Catalog>,
        sessions: Arc<SessionRegistry>,
    ) {
        let routing_key = component.base_key();
        let component = component.clone();
        let handler: TaskHandler = Arc::new(move |payload, tcx| {
            let component = component.clone();
            let catalog = Arc::clone(&catalog);
            let sessions = Arc::clone(&sessions);
            async move {
                let args = payload
                    .get("arguments")
                    .cloned()
                    .unwrap_or(Value::Null);
                let session = payload
                    .get("session")
                    .and_then(Value::as_str)
                    .and_then(|id| sessions.get(id))
                    .unwrap_or_else(|| Arc::new(Session::anonymous()));
                let cx = RequestContext::new(session, catalog)
                    .with_progress(tcx.progress)
                    .with_cancellation(tcx.cancel);
                component.invoke(args, cx).await
            }
            .boxed()
        });
        self.backend.register(&routing_key, handler);
    }

    fn effective_ttl(&self, requested: Option<u64>) -> Option<u64> {
        Some(
            self.options
                .server_ttl
                .unwrap_or_else(|| requested.unwrap_or(self.options.default_ttl)),
        )
    }

    /// Applies task-mode policy and executes the call.
    ///
    /// - No task metadata: synchronous execution, unless the component
    ///   requires backgrounding (`MethodNotSupported`).
    /// - Task metadata on a forbidden-mode component: resolved
    ///   immediately as a failed task with `returned_immediately` set —
    ///   never a hanging task.
    /// - Otherwise: submitted to the backend and a handle returned.
    pub async fn execute(
        &self,
        component: &Component,
        args: Value,
        cx: &RequestContext,
        meta: Option<TaskMeta>,
    ) -> Result<CallOutcome> {
        let mode = component.task_config.mode;
        match (mode, meta) {
            (TaskMode::Required, None) => Err(Error::MethodNotSupported {
                component: component.key(),
                explanation: "requires task-augmented execution (mode=required)".to_string(),
            }),
            (_, None) => {
                let value = component.invoke(args, cx.clone()).await?;
                Ok(CallOutcome::Completed(value))
            }
            (TaskMode::Forbidden, Some(meta)) => {
                let err = Error::MethodNotSupported {
                    component: component.key(),
                    explanation: "does not support task-augmented execution (mode=forbidden)"
                        .to_string(),
                };
                let task_id = meta.task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                let mut task = Task::new(
                    task_id,
                    TaskStatus::Failed,
                    self.effective_ttl(meta.ttl),
                    Some(self.options.default_poll_interval),
                );
                task.status_message = Some(err.to_string());
                Ok(CallOutcome::Task(CreateTaskResult {
                    task,
                    returned_immediately: true,
                }))
            }
            (_, Some(meta)) => {
                let owner = cx.session().id().to_string();
                if let Some(max) = self.options.max_tasks_per_session {
                    let active = self
                        .backend
                        .list(&owner)
                        .await?
                        .iter()
                        .filter(|t| !t.status.is_terminal())
                        .count();
                    if active >= max {
                        return Err(Error::ResourceExhausted {
                            message: format!(
                                "session has {active} active tasks (limit {max}); \
                                 wait for one to finish or cancel one"
                            ),
                        });
                    }
                }
                let request = SubmitRequest {
                    routing_key: component.base_key(),
                    payload: json!({
                        "arguments": args,
                        "session": owner,
                    }),
                    owner,
                    task_id: meta.task_id,
                    ttl: self.effective_ttl(meta.ttl),
                    poll_interval: Some(
                        component.task_config.poll_interval.as_millis() as u64
                    ),
                };
                let task = self.backend.submit(request).await?;
                Ok(CallOutcome::Task(CreateTaskResult {
                    task,
                    returned_immediately: false,
                }))
            }
        }
    }

    /// Status of a session's task.
    pub async fn status(&self, session: &Session, task_id: &str) -> Result<Task> {
        self.backend.get_status(session.id(), task_id).await
    }

    /// Best-effort cancellation of a session's task.
    pub async fn cancel(&self, session: &Session, task_id: &str) -> Result<Task> {
        self.backend.cancel(session.id(), task_id).await
    }

    /// Blocks until terminal or timeout; never cancels the task.
    pub async fn wait(
        &self,
        session: &Session,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Task> {
        self.backend.wait(session.id(), task_id, timeout).await
    }

    /// Like [`wait`](Self::wait), but also returns as soon as the task
    /// reaches the given intermediate state.
    pub async fn wait_until(
        &self,
        session: &Session,
        task_id: &str,
        timeout: Option<Duration>,
        until: Option<TaskStatus>,
    ) -> Result<Task> {
        self.backend
            .wait_until(session.id(), task_id, timeout, until)
            .await
    }

    /// Blocks until terminal and returns the payload, re-raising a failed
    /// task's captured error.
    pub async fn result(
        &self,
        session: &Session,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.backend.get_result(session.id(), task_id, timeout).await
    }

    /// Live tasks for a session.
    pub async fn list(&self, session: &Session) -> Result<Vec<Task>> {
        self.backend.list(session.id()).await
    }
}
