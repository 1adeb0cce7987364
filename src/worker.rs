//! Polling workers: each poller repeatedly asks the queue for a task of its
//! type, executes it and reports the result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::{EngineError, TaskQueue};
use crate::task::{TaskHandler, TaskHandlers, TaskResult};

pub struct TaskRunner {
    queue: Arc<dyn TaskQueue>,
    worker_id: String,
    shutdown: watch::Sender<bool>,
    workers: JoinSet<()>,
}

impl TaskRunner {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            worker_id: format!("orderflow-{}", Uuid::new_v4()),
            shutdown,
            workers: JoinSet::new(),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Spawn `pollers` concurrent poll loops for `handler`.
    pub fn start_worker(
        &mut self,
        handler: Arc<dyn TaskHandler>,
        pollers: usize,
        poll_interval: Duration,
    ) {
        for poller in 0..pollers.max(1) {
            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&handler);
            let worker_id = format!("{}-{}-{poller}", self.worker_id, handler.name());
            let shutdown = self.shutdown.subscribe();
            self.workers.spawn(poll_loop(queue, handler, worker_id, poll_interval, shutdown));
        }
    }

    pub fn start_all(&mut self, handlers: &TaskHandlers, pollers: usize, poll_interval: Duration) {
        for handler in handlers.iter() {
            self.start_worker(Arc::clone(handler), pollers, poll_interval);
        }
    }

    pub fn running(&self) -> usize {
        self.workers.len()
    }

    /// Ask every poller to stop after its current task.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for every poller to exit.
    pub async fn wait_workers(&mut self) {
        while let Some(joined) = self.workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "worker task panicked");
            }
        }
    }
}

/// Poll once; returns whether a task was executed.
pub async fn poll_once(
    queue: &dyn TaskQueue,
    handler: &dyn TaskHandler,
    worker_id: &str,
) -> Result<bool, EngineError> {
    let Some(task) = queue.poll_task(handler.name(), worker_id).await? else {
        return Ok(false);
    };
    debug!(task = %task.task_id, task_type = %task.task_type, "polled task");
    let result = handler
        .execute(&task)
        .unwrap_or_else(|err| TaskResult::failed(&task, err.to_string()))
        .with_worker_id(worker_id);
    queue.update_task(&result).await?;
    Ok(true)
}

async fn poll_loop(
    queue: Arc<dyn TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    worker_id: String,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker = %worker_id, task_type = %handler.name(), "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let idle = match poll_once(queue.as_ref(), handler.as_ref(), &worker_id).await {
            Ok(executed) => !executed,
            Err(err) => {
                error!(worker = %worker_id, error = %err, "poll failed");
                true
            }
        };
        if idle {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
    info!(worker = %worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Fields, OrderRequest, Payment};
    use crate::task::{FraudCheck, INTAKE_ORDER, IntakeOrder, Task, TaskStatus};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemoryQueue {
        scheduled: Mutex<VecDeque<Task>>,
        results: Mutex<Vec<TaskResult>>,
    }

    #[async_trait]
    impl TaskQueue for MemoryQueue {
        async fn poll_task(
            &self,
            task_type: &str,
            _worker_id: &str,
        ) -> Result<Option<Task>, EngineError> {
            let mut scheduled = self.scheduled.lock().await;
            let index = scheduled.iter().position(|t| t.task_type == task_type);
            Ok(index.and_then(|i| scheduled.remove(i)))
        }

        async fn update_task(&self, result: &TaskResult) -> Result<(), EngineError> {
            self.results.lock().await.push(result.clone());
            Ok(())
        }
    }

    fn intake_task(id: &str) -> Task {
        let request = OrderRequest {
            ordered_by: "Priya Raman".into(),
            total: dec!(42),
            delivery_zip: "60606".into(),
            payment: Some(Payment::credit_card("4111")),
        };
        let mut input = Fields::new();
        input.insert("order".into(), serde_json::to_value(request).unwrap());
        Task {
            task_id: id.into(),
            task_type: INTAKE_ORDER.into(),
            reference_task_name: INTAKE_ORDER.into(),
            workflow_instance_id: "run-1".into(),
            input_data: input,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn poll_once_reports_result_with_worker_id() {
        let queue = MemoryQueue::default();
        queue.scheduled.lock().await.push_back(intake_task("t-1"));

        assert!(poll_once(&queue, &IntakeOrder, "w-1").await.unwrap());
        assert!(!poll_once(&queue, &IntakeOrder, "w-1").await.unwrap());

        let results = queue.results.lock().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].task_id, "t-1");
        assert_eq!(results[0].status, TaskStatus::Completed);
        assert_eq!(results[0].worker_id.as_deref(), Some("w-1"));
    }

    #[tokio::test]
    async fn malformed_task_is_reported_failed() {
        let queue = MemoryQueue::default();
        queue.scheduled.lock().await.push_back(Task {
            task_id: "t-2".into(),
            task_type: "FraudCheck".into(),
            ..Default::default()
        });

        assert!(poll_once(&queue, &FraudCheck, "w-1").await.unwrap());
        let results = queue.results.lock().await;
        assert_eq!(results[0].status, TaskStatus::Failed);
        assert!(results[0].error().is_some());
    }

    #[tokio::test]
    async fn runner_drains_queue_and_shuts_down() {
        let queue = Arc::new(MemoryQueue::default());
        for i in 0..3 {
            queue
                .scheduled
                .lock()
                .await
                .push_back(intake_task(&format!("t-{i}")));
        }

        let mut runner = TaskRunner::new(queue.clone()).with_worker_id("test");
        runner.start_all(&TaskHandlers::order_fulfillment(), 2, Duration::from_millis(10));
        assert_eq!(runner.running(), 8);

        for _ in 0..200 {
            if queue.results.lock().await.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        runner.shutdown();
        runner.wait_workers().await;

        assert_eq!(runner.running(), 0);
        let results = queue.results.lock().await;
        assert_eq!(results.len(), 3);
        assert!(results
            .iter()
            .all(|r| r.worker_id.as_deref().is_some_and(|w| w.starts_with("test-IntakeOrder-"))));
    }
}
