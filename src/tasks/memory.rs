//! Spawn-per-task in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tasks::{
    ProgressSink, SubmitRequest, Task, TaskBackend, TaskContext, TaskHandler, TaskStatus, TaskTable,
};

/// Single-process backend: each submission spawns a task on the runtime
/// immediately, so tasks are created in the `working` state.
#[derive(Default)]
pub struct InMemoryTaskBackend {
    table: Arc<TaskTable>,
    handlers: DashMap<String, TaskHandler>,
}

impl InMemoryTaskBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskBackend for InMemoryTaskBackend {
    fn register(&self, routing_key: &str, handler: TaskHandler) {
        self.handlers.insert(routing_key.to_string(), handler);
    }

    async fn submit(&self, request: SubmitRequest) -> Result<Task> {
        let handler = self
            .handlers
            .get(&request.routing_key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                Error::internal(format!(
                    "no task handler registered for routing key {}",
                    request.routing_key
                ))
            })?;

        let task_id = request
            .task_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (task, cancel) = self.table.insert(
            &request.owner,
            &task_id,
            TaskStatus::Working,
            request.ttl,
            request.poll_interval,
        )?;

        let table = Arc::clone(&self.table);
        let owner = request.owner;
        let sink = ProgressSink::new(Arc::clone(&table), owner.clone(), task_id.clone());
        let fut = handler(
            request.payload,
            TaskContext {
                progress: sink,
                cancel: cancel.clone(),
            },
        );
        tokio::spawn(async move {
            tokio::select! {
                // When the result and the cancel race, the result wins:
                // terminal state is whichever resolves first.
                biased;
                out = fut => match out {
                    Ok(value) => {
                        let _ = table.try_complete(&owner, &task_id, value);
                    }
                    Err(err) => {
                        tracing::debug!(task_id, error = %err, "task handler failed");
                        let _ = table.try_fail(&owner, &task_id, err.to_payload());
                    }
                },
                () = cancel.cancelled() => {
                    // The cancel call already transitioned the record.
                }
            }
        });
        Ok(task)
    }

    async fn get_status(&self, owner: &str, task_id: &str) -> Result<Task> {
        self.table.get(owner, task_id)
    }

    async fn cancel(&self, owner: &str, task_id: &str) -> Result<Task> {
        self.table.cancel(owner, task_id)
    }

    async fn wait_until(
        &self,
        owner: &str,
        task_id: &str,
        timeout: Option<Duration>,
        until: Option<TaskStatus>,
    ) -> Result<Task> {
        self.table.wait_until(owner, task_id, timeout, until).await
    }

    async fn get_result(
        &self,
        owner: &str,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.table.result(owner, task_id, timeout).await
    }

    async fn list(&self, owner: &str) -> Result<Vec<Task>> {
        Ok(self.table.list(owner))
    }
}
