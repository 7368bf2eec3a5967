//! Bounded work-queue backend.
//!
//! Submissions land in a bounded queue per routing key and are drained by
//! a fixed worker pool, decoupling acceptance from execution the way a
//! durable distributed queue would. Tasks are created in the `submitted`
//! state and move to `working` when a worker picks them up. A full queue
//! rejects the submission instead of blocking the caller.
//!
//! This implementation is process-local; a remote-queue backend plugs in
//! behind the same [`TaskBackend`] contract with identical lifecycle,
//! TTL, and isolation semantics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tasks::{
    ProgressSink, SubmitRequest, Task, TaskBackend, TaskContext, TaskHandler, TaskStatus, TaskTable,
};

const DEFAULT_WORKERS_PER_KEY: usize = 2;
const DEFAULT_QUEUE_DEPTH: usize = 64;

struct WorkItem {
    owner: String,
    task_id: String,
    routing_key: String,
    payload: Value,
}

/// Bounded queue + worker pool backend.
pub struct QueueTaskBackend {
    table: Arc<TaskTable>,
    handlers: Arc<DashMap<String, TaskHandler>>,
    queues: DashMap<String, mpsc::Sender<WorkItem>>,
    workers_per_key: usize,
    queue_depth: usize,
}

impl Default for QueueTaskBackend {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS_PER_KEY, DEFAULT_QUEUE_DEPTH)
    }
}

impl QueueTaskBackend {
    /// Creates a backend with `workers_per_key` workers draining each
    /// routing key's queue of at most `queue_depth` pending items.
    pub fn new(workers_per_key: usize, queue_depth: usize) -> Self {
        Self {
            table: Arc::new(TaskTable::new()),
            handlers: Arc::new(DashMap::new()),
            queues: DashMap::new(),
            workers_per_key: workers_per_key.max(1),
            queue_depth: queue_depth.max(1),
        }
    }

    fn queue_for(&self, routing_key: &str) -> mpsc::Sender<WorkItem> {
        if let Some(sender) = self.queues.get(routing_key) {
            return sender.clone();
        }
        let entry = self.queues.entry(routing_key.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.queue_depth);
            let rx = Arc::new(Mutex::new(rx));
            for _ in 0..self.workers_per_key {
                let rx = Arc::clone(&rx);
                let table = Arc::clone(&self.table);
                let handlers = Arc::clone(&self.handlers);
                tokio::spawn(worker_loop(rx, table, handlers));
            }
            tx
        });
        entry.clone()
    }
}

async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    table: Arc<TaskTable>,
    handlers: Arc<DashMap<String, TaskHandler>>,
) {
    loop {
        let item = rx.lock().await.recv().await;
        let Some(item) = item else {
            return;
        };
        // Cancelled or evicted while queued: nothing to run.
        if table
            .transition(&item.owner, &item.task_id, TaskStatus::Working)
            .is_err()
        {
            continue;
        }
        let Some(handler) = handlers
            .get(&item.routing_key)
            .map(|entry| Arc::clone(entry.value()))
        else {
            let _ = table.try_fail(
                &item.owner,
                &item.task_id,
                Error::internal(format!(
                    "no task handler registered for routing key {}",
                    item.routing_key
                ))
                .to_payload(),
            );
            continue;
        };

        let cancel = table
            .cancel_token(&item.owner, &item.task_id)
            .unwrap_or_default();
        let sink = ProgressSink::new(Arc::clone(&table), item.owner.clone(), item.task_id.clone());
        let fut = handler(
            item.payload,
            TaskContext {
                progress: sink,
                cancel: cancel.clone(),
            },
        );
        tokio::select! {
            biased;
            out = fut => match out {
                Ok(value) => {
                    let _ = table.try_complete(&item.owner, &item.task_id, value);
                }
                Err(err) => {
                    tracing::debug!(task_id = item.task_id, error = %err, "task handler failed");
                    let _ = table.try_fail(&item.owner, &item.task_id, err.to_payload());
                }
            },
            () = cancel.cancelled() => {}
        }
    }
}

#[async_trait]
impl TaskBackend for QueueTaskBackend {
    fn register(&self, routing_key: &str, handler: TaskHandler) {
        self.handlers.insert(routing_key.to_string(), handler);
    }

    async fn submit(&self, request: SubmitRequest) -> Result<Task> {
        if !self.handlers.contains_key(&request.routing_key) {
            return Err(Error::internal(format!(
                "no task handler registered for routing key {}",
                request.routing_key
            )));
        }
        let task_id = request
            .task_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (task, _cancel) = self.table.insert(
            &request.owner,
            &task_id,
            TaskStatus::Submitted,
            request.ttl,
            request.poll_interval,
        )?;

        let item = WorkItem {
            owner: request.owner.clone(),
            task_id: task_id.clone(),
            routing_key: request.routing_key.clone(),
            payload: request.payload,
        };
        if let Err(err) = self.queue_for(&request.routing_key).try_send(item) {
            // Reject rather than block. The record is removed, not
            // cancelled, so a retry may reuse the same task ID.
            self.table.remove(&request.owner, &task_id);
            return Err(match err {
                mpsc::error::TrySendError::Full(_) => Error::ResourceExhausted {
                    message: format!(
                        "task queue for {} is full, retry later",
                        request.routing_key
                    ),
                },
                mpsc::error::TrySendError::Closed(_) => {
                    Error::internal("task queue workers have shut down")
                }
            });
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    fn echo_handler() -> TaskHandler {
        Arc::new(|payload, _cx| async move { Ok(payload) }.boxed())
    }

    fn submit_request(routing_key: &str, owner: &str) -> SubmitRequest {
        SubmitRequest {
            routing_key: routing_key.to_string(),
            payload: json!("payload"),
            owner: owner.to_string(),
            task_id: None,
            ttl: Some(60_000),
            poll_interval: None,
        }
    }

    #[tokio::test]
    async fn queued_task_completes_through_worker() {
        let backend = QueueTaskBackend::default();
        backend.register("tool:echo", echo_handler());
        let task = backend.submit(submit_request("tool:echo", "s1")).await.unwrap();
        // Created queued, not yet running.
        assert!(matches!(
            task.status,
            TaskStatus::Submitted | TaskStatus::Working
        ));

        let result = backend
            .get_result("s1", &task.task_id, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(result, json!("payload"));
    }

    #[tokio::test]
    async fn full_queue_rejects_submission() {
        // One worker, depth one, and a handler that parks forever.
        let backend = QueueTaskBackend::new(1, 1);
        backend.register(
            "tool:park",
            Arc::new(|_payload, cx| {
                async move {
                    cx.cancel.cancelled().await;
                    Ok(json!(null))
                }
                .boxed()
            }),
        );

        // First occupies the worker, second fills the queue slot.
        backend.submit(submit_request("tool:park", "s1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.submit(submit_request("tool:park", "s1")).await.unwrap();

        let rejected = SubmitRequest {
            task_id: Some("mine".to_string()),
            ..submit_request("tool:park", "s1")
        };
        let err = backend.submit(rejected.clone()).await.unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { .. }));

        // Rejection leaves no record behind: not visible to polling, and
        // the client-supplied ID stays free for the retry.
        let err = backend.get_status("s1", "mine").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(backend.list("s1").await.unwrap().len(), 2);

        let err = backend.submit(rejected.clone()).await.unwrap_err();
        assert!(
            matches!(err, Error::ResourceExhausted { .. }),
            "retry with the same task ID must hit queue capacity, not a duplicate-ID check"
        );

        // Once capacity frees up, the same ID is accepted.
        for task in backend.list("s1").await.unwrap() {
            backend.cancel("s1", &task.task_id).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let task = backend.submit(rejected).await.unwrap();
        assert_eq!(task.task_id, "mine");
    }

    #[tokio::test]
    async fn cancelling_a_queued_task_skips_execution() {
        let backend = QueueTaskBackend::new(1, 8);
        backend.register(
            "tool:slow",
            Arc::new(|_payload, _cx| {
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(json!("ran"))
                }
                .boxed()
            }),
        );

        let first = backend.submit(submit_request("tool:slow", "s1")).await.unwrap();
        let second = backend.submit(submit_request("tool:slow", "s1")).await.unwrap();

        // Second is still queued behind the single worker; cancel it.
        let cancelled = backend.cancel("s1", &second.task_id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        let done = backend
            .wait("s1", &first.task_id, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        // The cancelled task never ran.
        let still = backend.get_status("s1", &second.task_id).await.unwrap();
        assert_eq!(still.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn isolation_matches_in_memory_backend() {
        let backend = QueueTaskBackend::default();
        backend.register("tool:echo", echo_handler());
        let task = backend.submit(submit_request("tool:echo", "s1")).await.unwrap();
        let err = backend.get_status("s2", &task.task_id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
