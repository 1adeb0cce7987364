//! Declarative workflow and task definitions, independent of any runtime.
//!
//! The serialized forms follow the Conductor metadata API, so the same values
//! are registered with a remote engine and interpreted by [`LocalEngine`].
//!
//! [`LocalEngine`]: crate::engine::LocalEngine

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::EngineError;
use crate::model::Fields;

pub const VALUE_PARAM_EVALUATOR: &str = "value-param";
pub const SWITCH_CASE_VALUE: &str = "switchCaseValue";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryLogic {
    #[default]
    Fixed,
    ExponentialBackoff,
    LinearBackoff,
}

/// Per-task retry policy. `retry_count` counts retries after the first attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub retry_logic: RetryLogic,
    pub retry_delay_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_logic: RetryLogic::Fixed,
            retry_delay_seconds: 60,
        }
    }
}

impl RetryPolicy {
    pub fn exponential(retry_count: u32) -> Self {
        Self {
            retry_count,
            retry_logic: RetryLogic::ExponentialBackoff,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.retry_delay_seconds;
        let seconds = match self.retry_logic {
            RetryLogic::Fixed => base,
            RetryLogic::ExponentialBackoff => {
                base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            }
            RetryLogic::LinearBackoff => base.saturating_mul(u64::from(attempt.max(1))),
        };
        Duration::from_secs(seconds)
    }

    /// Whether a task that has failed `failures` times may run again.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures <= self.retry_count
    }
}

/// Operational metadata for one task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(flatten)]
    pub retry: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
}

impl TaskDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            retry: RetryPolicy::default(),
            owner_email: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn owner_email(mut self, owner_email: Option<String>) -> Self {
        self.owner_email = owner_email;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation("task definition name is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// Executed by a polling worker.
    Simple,
    /// Routes to the case whose key equals the evaluated value, else to the default case.
    #[serde(rename_all = "camelCase")]
    Switch {
        evaluator_type: String,
        expression: String,
        #[serde(default)]
        decision_cases: BTreeMap<String, Vec<WorkflowTask>>,
        #[serde(default)]
        default_case: Vec<WorkflowTask>,
    },
    /// Parks the run until an external signal arrives.
    Wait,
}

/// One node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTask {
    pub name: String,
    pub task_reference_name: String,
    #[serde(default)]
    pub input_parameters: Fields,
    #[serde(flatten)]
    pub kind: TaskKind,
}

impl WorkflowTask {
    /// A worker task whose reference name equals its task name.
    pub fn simple(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            task_reference_name: name.clone(),
            name,
            input_parameters: Fields::new(),
            kind: TaskKind::Simple,
        }
    }

    /// A value-param switch on `value`, usually a `${...}` reference.
    pub fn switch(
        reference: impl Into<String>,
        value: impl Into<String>,
        cases: impl IntoIterator<Item = (String, Vec<WorkflowTask>)>,
        default_case: Vec<WorkflowTask>,
    ) -> Self {
        let reference = reference.into();
        let mut input_parameters = Fields::new();
        input_parameters.insert(SWITCH_CASE_VALUE.to_string(), Value::String(value.into()));
        Self {
            name: reference.clone(),
            task_reference_name: reference,
            input_parameters,
            kind: TaskKind::Switch {
                evaluator_type: VALUE_PARAM_EVALUATOR.to_string(),
                expression: SWITCH_CASE_VALUE.to_string(),
                decision_cases: cases.into_iter().collect(),
                default_case,
            },
        }
    }

    pub fn wait(reference: impl Into<String>) -> Self {
        let reference = reference.into();
        Self {
            name: reference.clone(),
            task_reference_name: reference,
            input_parameters: Fields::new(),
            kind: TaskKind::Wait,
        }
    }

    /// Bind an input parameter to a literal or a `${...}` expression.
    pub fn input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_parameters.insert(key.into(), value.into());
        self
    }

    pub fn is_simple(&self) -> bool {
        matches!(self.kind, TaskKind::Simple)
    }

    /// This node followed by every node nested in its switch cases.
    pub fn flatten(&self) -> Vec<&WorkflowTask> {
        let mut nodes = vec![self];
        if let TaskKind::Switch {
            decision_cases,
            default_case,
            ..
        } = &self.kind
        {
            for task in decision_cases.values().flatten().chain(default_case) {
                nodes.extend(task.flatten());
            }
        }
        nodes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Zero means the run may stay parked indefinitely.
    #[serde(default)]
    pub timeout_seconds: u64,
    pub tasks: Vec<WorkflowTask>,
}

fn default_schema_version() -> u32 {
    2
}

impl WorkflowDef {
    /// Every node of the graph, depth first.
    pub fn all_tasks(&self) -> Vec<&WorkflowTask> {
        self.tasks.iter().flat_map(WorkflowTask::flatten).collect()
    }

    pub fn task(&self, reference: &str) -> Option<&WorkflowTask> {
        self.all_tasks()
            .into_iter()
            .find(|task| task.task_reference_name == reference)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation("workflow name is empty".into()));
        }
        if self.version == 0 {
            return Err(EngineError::Validation(format!(
                "workflow {} must have a version of at least 1",
                self.name
            )));
        }
        if self.tasks.is_empty() {
            return Err(EngineError::Validation(format!(
                "workflow {} has no tasks",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for task in self.all_tasks() {
            if task.name.trim().is_empty() {
                return Err(EngineError::Validation(format!(
                    "task {} has no name",
                    task.task_reference_name
                )));
            }
            if !seen.insert(task.task_reference_name.as_str()) {
                return Err(EngineError::Validation(format!(
                    "duplicate task reference name {}",
                    task.task_reference_name
                )));
            }
            if let TaskKind::Switch { decision_cases, .. } = &task.kind {
                if decision_cases.is_empty() {
                    return Err(EngineError::Validation(format!(
                        "switch {} has no decision cases",
                        task.task_reference_name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Fluent construction of a [`WorkflowDef`].
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    def: WorkflowDef,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            def: WorkflowDef {
                name: name.into(),
                description: String::new(),
                version: 1,
                owner_email: None,
                schema_version: default_schema_version(),
                timeout_seconds: 0,
                tasks: Vec::new(),
            },
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.def.version = version;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.def.description = description.into();
        self
    }

    pub fn owner_email(mut self, owner_email: Option<String>) -> Self {
        self.def.owner_email = owner_email;
        self
    }

    pub fn add(mut self, task: WorkflowTask) -> Self {
        self.def.tasks.push(task);
        self
    }

    pub fn build(self) -> Result<WorkflowDef, EngineError> {
        self.def.validate()?;
        Ok(self.def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_delays_follow_logic() {
        let fixed = RetryPolicy {
            retry_count: 3,
            retry_logic: RetryLogic::Fixed,
            retry_delay_seconds: 5,
        };
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(fixed.delay_for_attempt(4), Duration::from_secs(5));

        let exponential = RetryPolicy {
            retry_logic: RetryLogic::ExponentialBackoff,
            ..fixed.clone()
        };
        assert_eq!(exponential.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(exponential.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(exponential.delay_for_attempt(4), Duration::from_secs(40));

        let linear = RetryPolicy {
            retry_logic: RetryLogic::LinearBackoff,
            ..fixed
        };
        assert_eq!(linear.delay_for_attempt(3), Duration::from_secs(15));
    }

    #[test]
    fn retry_budget_counts_retries_after_first_attempt() {
        let policy = RetryPolicy::exponential(6);
        assert!(policy.allows_retry(6));
        assert!(!policy.allows_retry(7));
        assert!(!RetryPolicy { retry_count: 0, ..RetryPolicy::default() }.allows_retry(1));
    }

    #[test]
    fn task_def_serializes_flat_retry_fields() {
        let def = TaskDef::new("IntakeOrder")
            .description("intake")
            .retry(RetryPolicy::exponential(6));
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["name"], json!("IntakeOrder"));
        assert_eq!(json["retryCount"], json!(6));
        assert_eq!(json["retryLogic"], json!("EXPONENTIAL_BACKOFF"));
        assert_eq!(json["retryDelaySeconds"], json!(60));
        assert!(json.get("ownerEmail").is_none());
    }

    #[test]
    fn task_def_without_retry_fields_gets_defaults() {
        let def: TaskDef = serde_json::from_value(json!({"name": "PriceOrder"})).unwrap();
        assert_eq!(def.retry, RetryPolicy::default());
    }

    #[test]
    fn switch_serializes_like_conductor() {
        let switch = WorkflowTask::switch(
            "Decide",
            "${Check.output.order.payment.type}",
            [("ON_ACCOUNT".to_string(), vec![WorkflowTask::simple("Review")])],
            Vec::new(),
        );
        let json = serde_json::to_value(&switch).unwrap();

        assert_eq!(json["type"], json!("SWITCH"));
        assert_eq!(json["evaluatorType"], json!("value-param"));
        assert_eq!(json["expression"], json!("switchCaseValue"));
        assert_eq!(
            json["inputParameters"]["switchCaseValue"],
            json!("${Check.output.order.payment.type}")
        );
        assert_eq!(json["decisionCases"]["ON_ACCOUNT"][0]["type"], json!("SIMPLE"));

        let parsed: WorkflowTask = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, switch);
    }

    #[test]
    fn builder_rejects_duplicate_references() {
        let err = WorkflowBuilder::new("Dup")
            .add(WorkflowTask::simple("A"))
            .add(WorkflowTask::switch(
                "Decide",
                "x",
                [("Y".to_string(), vec![WorkflowTask::simple("A")])],
                Vec::new(),
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn builder_rejects_empty_switch_and_empty_graph() {
        let err = WorkflowBuilder::new("NoTasks").build().unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = WorkflowBuilder::new("EmptySwitch")
            .add(WorkflowTask::switch("Decide", "x", Vec::new(), Vec::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(msg) if msg.contains("no decision cases")));

        let err = WorkflowBuilder::new("Zero")
            .version(0)
            .add(WorkflowTask::simple("A"))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn lookup_finds_nested_tasks() {
        let def = WorkflowBuilder::new("Nested")
            .add(WorkflowTask::switch(
                "Decide",
                "x",
                [("Y".to_string(), vec![WorkflowTask::simple("Inner")])],
                vec![WorkflowTask::simple("Fallback")],
            ))
            .add(WorkflowTask::wait("Park"))
            .build()
            .unwrap();

        assert_eq!(def.all_tasks().len(), 4);
        assert!(def.task("Inner").unwrap().is_simple());
        assert!(def.task("Fallback").is_some());
        assert!(def.task("Missing").is_none());
    }
}
