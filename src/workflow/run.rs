use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::model::{CreditVerdict, Fields, FraudVerdict, Order, PaymentType, order_from_input};
use crate::task::TaskStatus;

use super::definition::WorkflowTask;
use super::state::RunState;

/// Latest input and output of one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub input: Fields,
    pub output: Fields,
}

/// One attempt of a worker task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    pub reference: String,
    pub task_type: String,
    pub attempt: u32,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// A single run of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_name: String,
    pub workflow_version: u32,
    pub correlation_id: Option<String>,
    pub state: RunState,
    pub state_history: Vec<RunState>,
    pub input: Fields,
    pub tasks: BTreeMap<String, TaskRecord>,
    pub executions: Vec<TaskExecution>,
    /// Nodes still to execute, front first. Switches splice their branch here.
    pub pending: VecDeque<WorkflowTask>,
    pub order: Option<Order>,
    pub failure_reason: Option<String>,
    pub output: Fields,
    failures: BTreeMap<String, u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(
        workflow_name: impl Into<String>,
        workflow_version: u32,
        tasks: Vec<WorkflowTask>,
        correlation_id: Option<String>,
        input: Fields,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_name: workflow_name.into(),
            workflow_version,
            correlation_id,
            state: RunState::Created,
            state_history: Vec::new(),
            input,
            tasks: BTreeMap::new(),
            executions: Vec::new(),
            pending: tasks.into(),
            order: None,
            failure_reason: None,
            output: Fields::new(),
            failures: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// The tree that `${...}` expressions resolve against.
    pub fn context(&self) -> Value {
        let mut context = Map::new();
        let mut workflow = Map::new();
        workflow.insert("input".into(), Value::Object(self.input.clone()));
        context.insert("workflow".into(), Value::Object(workflow));
        for (reference, record) in &self.tasks {
            let mut node = Map::new();
            node.insert("input".into(), Value::Object(record.input.clone()));
            node.insert("output".into(), Value::Object(record.output.clone()));
            context.insert(reference.clone(), Value::Object(node));
        }
        Value::Object(context)
    }

    pub fn task(&self, reference: &str) -> Option<&TaskRecord> {
        self.tasks.get(reference)
    }

    /// Store the latest input and output of a node.
    pub fn record_task(&mut self, reference: &str, input: Fields, output: Fields) {
        self.tasks
            .insert(reference.to_string(), TaskRecord { input, output });
        self.touch();
    }

    /// Adopt the order carried by a worker's output as the current order.
    pub fn observe_order(&mut self, output: &Fields) {
        if let Ok(order) = order_from_input(output) {
            self.order = Some(order);
        }
    }

    pub fn record_execution(&mut self, execution: TaskExecution) {
        self.executions.push(execution);
        self.touch();
    }

    pub fn failures(&self, reference: &str) -> u32 {
        self.failures.get(reference).copied().unwrap_or(0)
    }

    /// Count one more failed attempt of `reference` and return the new total.
    pub fn record_failure(&mut self, reference: &str) -> u32 {
        let count = self.failures.entry(reference.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failures.values().sum()
    }
}

/// Structured summary of a run, emitted once it settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub run_id: String,
    pub workflow: String,
    pub version: u32,
    pub correlation_id: Option<String>,
    pub order_number: Option<String>,
    pub total: Option<Decimal>,
    pub payment_type: Option<PaymentType>,
    pub fraud: Option<FraudVerdict>,
    pub credit_review: Option<CreditVerdict>,
    pub state: RunState,
    pub state_transitions: Vec<RunState>,
    pub task_executions: usize,
    pub failed_attempts: u32,
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl AuditRecord {
    pub fn from_run(run: &WorkflowRun) -> Self {
        let mut transitions = run.state_history.clone();
        transitions.push(run.state);
        let order = run.order.as_ref();

        Self {
            run_id: run.id.clone(),
            workflow: run.workflow_name.clone(),
            version: run.workflow_version,
            correlation_id: run.correlation_id.clone(),
            order_number: order.map(|o| o.number().to_string()),
            total: order.map(Order::total),
            payment_type: order.and_then(Order::payment_type),
            fraud: order.and_then(|o| o.metadata().fraud().cloned()),
            credit_review: order.and_then(|o| o.metadata().credit_review().cloned()),
            state: run.state,
            state_transitions: transitions,
            task_executions: run.executions.len(),
            failed_attempts: run.failed_attempts(),
            failure_reason: run.failure_reason.clone(),
            started_at: run.created_at,
            updated_at: run.updated_at,
            duration_ms: (run.updated_at - run.created_at).num_milliseconds(),
        }
    }
}
