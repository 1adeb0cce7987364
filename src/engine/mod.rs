//! Seams between the order workflow and whatever engine runs it.
//!
//! [`ConductorClient`] talks to a remote Conductor-compatible server;
//! [`LocalEngine`] interprets the same definitions in process.

pub mod conductor;
pub mod error;
pub mod local;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::Fields;
use crate::task::{Task, TaskResult};
use crate::workflow::{TaskDef, WorkflowDef};

pub use conductor::{ConductorClient, Credentials};
pub use error::EngineError;
pub use local::LocalEngine;

/// Metadata and run lifecycle operations.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn register_task_definitions(&self, defs: &[TaskDef]) -> Result<(), EngineError>;

    async fn update_task_definition(&self, def: &TaskDef) -> Result<(), EngineError>;

    /// Without `overwrite`, an existing name/version pair is a [`EngineError::VersionConflict`].
    async fn register_workflow_definition(
        &self,
        def: &WorkflowDef,
        overwrite: bool,
    ) -> Result<(), EngineError>;

    /// Returns the new run id.
    async fn start_workflow_run(&self, request: &StartWorkflowRequest)
    -> Result<String, EngineError>;

    async fn terminate_workflow_run(&self, run_id: &str, reason: &str) -> Result<(), EngineError>;
}

#[async_trait]
pub trait WebhookGateway: Send + Sync {
    /// An existing id is a [`EngineError::AlreadyExists`].
    async fn create_webhook(&self, config: &WebhookConfig) -> Result<(), EngineError>;

    async fn update_webhook(&self, id: &str, config: &WebhookConfig) -> Result<(), EngineError>;
}

/// Worker side of the engine: hand out scheduled tasks, accept their results.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn poll_task(&self, task_type: &str, worker_id: &str)
    -> Result<Option<Task>, EngineError>;

    async fn update_task(&self, result: &TaskResult) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowRequest {
    pub name: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub input: Fields,
}

impl StartWorkflowRequest {
    pub fn new(name: impl Into<String>, version: u32, input: Fields) -> Self {
        Self {
            name: name.into(),
            version,
            correlation_id: None,
            input,
        }
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookVerifier {
    /// Incoming headers must equal the configured values, which may be `${...}` expressions.
    #[default]
    HeaderBased,
    SignatureBased,
}

/// Routes external HTTP events to waiting runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub receiver_workflow_names_to_versions: BTreeMap<String, u32>,
    #[serde(default)]
    pub verifier: WebhookVerifier,
    #[serde(default = "default_source_platform")]
    pub source_platform: String,
}

fn default_source_platform() -> String {
    "Custom".to_string()
}

impl WebhookConfig {
    pub fn header_based(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            headers: BTreeMap::new(),
            receiver_workflow_names_to_versions: BTreeMap::new(),
            verifier: WebhookVerifier::HeaderBased,
            source_platform: default_source_platform(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn receiver(mut self, workflow: impl Into<String>, version: u32) -> Self {
        self.receiver_workflow_names_to_versions
            .insert(workflow.into(), version);
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.trim().is_empty() {
            return Err(EngineError::Validation("webhook id is empty".into()));
        }
        if self.receiver_workflow_names_to_versions.is_empty() {
            return Err(EngineError::Validation(format!(
                "webhook {} has no receiving workflow",
                self.id
            )));
        }
        if self.verifier == WebhookVerifier::HeaderBased && self.headers.is_empty() {
            return Err(EngineError::Validation(format!(
                "header-based webhook {} needs at least one header",
                self.id
            )));
        }
        Ok(())
    }
}
