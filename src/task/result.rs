use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DecodingError, TaskError};
use crate::model::{Fields, Order, order_from_input, to_output_envelope};

pub const ERROR_KEY: &str = "error";

/// A task invocation as dispatched by the engine to a worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub reference_task_name: String,
    #[serde(default)]
    pub workflow_instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub input_data: Fields,
    /// Number of earlier attempts of this task within the run.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub poll_count: u32,
}

/// Status vocabulary shared with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Advance to the next node.
    Completed,
    /// Retry according to the task's policy.
    Failed,
    /// End the run now, whatever retries remain.
    FailedWithTerminalError,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Completed => write!(f, "COMPLETED"),
            TaskStatus::Failed => write!(f, "FAILED"),
            TaskStatus::FailedWithTerminalError => write!(f, "FAILED_WITH_TERMINAL_ERROR"),
        }
    }
}

/// What a handler decided, before it is encoded into a [`TaskResult`].
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(Order),
    Retryable(String),
    Terminal { order: Order, reason: String },
}

/// The envelope a worker sends back for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub workflow_instance_id: String,
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub output_data: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl TaskResult {
    /// An empty result correlated with `task`.
    pub fn from_task(task: &Task, status: TaskStatus) -> Self {
        Self {
            workflow_instance_id: task.workflow_instance_id.clone(),
            task_id: task.task_id.clone(),
            status,
            output_data: Fields::new(),
            reason_for_incompletion: None,
            worker_id: None,
        }
    }

    /// A retryable failure carrying `message` under `output.error`.
    pub fn failed(task: &Task, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut result = Self::from_task(task, TaskStatus::Failed);
        result
            .output_data
            .insert(ERROR_KEY.to_string(), Value::String(message.clone()));
        result.reason_for_incompletion = Some(message);
        result
    }

    pub fn from_outcome(task: &Task, outcome: TaskOutcome) -> Result<Self, TaskError> {
        let result = match outcome {
            TaskOutcome::Completed(order) => {
                let mut result = Self::from_task(task, TaskStatus::Completed);
                result.output_data = to_output_envelope(&order)?;
                result
            }
            TaskOutcome::Retryable(reason) => Self::failed(task, reason),
            TaskOutcome::Terminal { order, reason } => {
                let mut result = Self::from_task(task, TaskStatus::FailedWithTerminalError);
                result.output_data = to_output_envelope(&order)?;
                result
                    .output_data
                    .insert(ERROR_KEY.to_string(), Value::String(reason.clone()));
                result.reason_for_incompletion = Some(reason);
                result
            }
        };
        Ok(result)
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// The order carried in the output, if any.
    pub fn order(&self) -> Result<Order, DecodingError> {
        order_from_input(&self.output_data)
    }

    /// Message under `output.error`, falling back to the incompletion reason.
    pub fn error(&self) -> Option<&str> {
        self.output_data
            .get(ERROR_KEY)
            .and_then(Value::as_str)
            .or(self.reason_for_incompletion.as_deref())
    }
}
