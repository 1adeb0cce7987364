//! In-process interpreter for workflow definitions.
//!
//! Worker tasks run inline through the registered [`TaskHandlers`]; each run is
//! guarded by its own mutex so concurrent signals and deliveries serialize per run.
//! Retry delays are only slept when backoff is enabled.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    EngineError, StartWorkflowRequest, WebhookConfig, WebhookGateway, WebhookVerifier,
    WorkflowEngine,
};
use crate::model::Fields;
use crate::task::{Task, TaskHandlers, TaskResult, TaskStatus};
use crate::workflow::definition::VALUE_PARAM_EVALUATOR;
use crate::workflow::{
    AuditRecord, RetryPolicy, RunState, StateMachine, TaskDef, TaskExecution, TaskKind,
    WorkflowDef, WorkflowRun, WorkflowTask, expr,
};

type RunHandle = Arc<Mutex<WorkflowRun>>;

/// Runs are kept for the life of the engine, settled ones included, so memory
/// grows with every run started.
pub struct LocalEngine {
    handlers: TaskHandlers,
    task_defs: RwLock<HashMap<String, TaskDef>>,
    workflows: RwLock<HashMap<(String, u32), WorkflowDef>>,
    webhooks: RwLock<HashMap<String, WebhookConfig>>,
    runs: RwLock<HashMap<String, RunHandle>>,
    backoff: bool,
}

impl LocalEngine {
    pub fn new(handlers: TaskHandlers) -> Self {
        Self {
            handlers,
            task_defs: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
            webhooks: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            backoff: false,
        }
    }

    /// Sleep the policy delay between attempts instead of retrying immediately.
    pub fn with_backoff(mut self, backoff: bool) -> Self {
        self.backoff = backoff;
        self
    }

    /// Snapshot of a run.
    pub async fn run(&self, run_id: &str) -> Option<WorkflowRun> {
        let handle = self.runs.read().await.get(run_id).cloned()?;
        let run = handle.lock().await;
        Some(run.clone())
    }

    pub async fn audit(&self, run_id: &str) -> Option<AuditRecord> {
        self.run(run_id).await.map(|run| AuditRecord::from_run(&run))
    }

    /// Complete the wait node a run is parked on, merging `payload` into its output.
    pub async fn signal(&self, run_id: &str, payload: Fields) -> Result<RunState, EngineError> {
        let handle = self.handle(run_id).await?;
        let mut run = handle.lock().await;
        if !is_waiting(&run) {
            return Err(EngineError::NotWaiting(run_id.to_string()));
        }
        self.resume(&mut run, payload).await?;
        Ok(run.state)
    }

    /// Resume every waiting run the webhook addresses whose header expressions
    /// match `headers`. Returns the ids of the resumed runs.
    pub async fn deliver_webhook(
        &self,
        webhook_id: &str,
        headers: &BTreeMap<String, String>,
        payload: Fields,
    ) -> Result<Vec<String>, EngineError> {
        let config = self
            .webhooks
            .read()
            .await
            .get(webhook_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("webhook {webhook_id}")))?;
        if config.verifier != WebhookVerifier::HeaderBased {
            return Err(EngineError::Validation(format!(
                "webhook {webhook_id} is not header based"
            )));
        }

        let handles: Vec<RunHandle> = self.runs.read().await.values().cloned().collect();
        let mut resumed = Vec::new();
        for handle in handles {
            let mut run = handle.lock().await;
            if !is_waiting(&run) {
                continue;
            }
            let addressed = config
                .receiver_workflow_names_to_versions
                .get(&run.workflow_name)
                .is_some_and(|version| *version == run.workflow_version);
            if !addressed || !headers_match(&config.headers, headers, &run) {
                continue;
            }
            info!(webhook = %webhook_id, run_id = %run.id, "webhook matched waiting run");
            self.resume(&mut run, payload.clone()).await?;
            resumed.push(run.id.clone());
        }
        Ok(resumed)
    }

    async fn handle(&self, run_id: &str) -> Result<RunHandle, EngineError> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownRun(run_id.to_string()))
    }

    async fn retry_policy(&self, task_type: &str) -> RetryPolicy {
        self.task_defs
            .read()
            .await
            .get(task_type)
            .map(|def| def.retry.clone())
            .unwrap_or_default()
    }

    /// Execute nodes until the run parks on a wait node or settles.
    async fn drive(&self, run: &mut WorkflowRun) -> Result<(), EngineError> {
        loop {
            if run.state.is_terminal() {
                return Ok(());
            }
            let Some(node) = run.pending.front().cloned() else {
                StateMachine::transition(run, RunState::Completed)?;
                info!(run_id = %run.id, "workflow run completed");
                return Ok(());
            };
            match &node.kind {
                TaskKind::Simple => self.execute_simple(run, &node).await?,
                TaskKind::Switch { .. } => execute_switch(run, &node)?,
                TaskKind::Wait => return park(run, &node),
            }
        }
    }

    async fn execute_simple(
        &self,
        run: &mut WorkflowRun,
        node: &WorkflowTask,
    ) -> Result<(), EngineError> {
        let reference = node.task_reference_name.as_str();
        enter(run, reference)?;
        let input = expr::resolve_parameters(&node.input_parameters, &run.context());
        let attempt = run.failures(reference);
        let task = Task {
            task_id: Uuid::new_v4().to_string(),
            task_type: node.name.clone(),
            reference_task_name: reference.to_string(),
            workflow_instance_id: run.id.clone(),
            correlation_id: run.correlation_id.clone(),
            input_data: input.clone(),
            retry_count: attempt,
            poll_count: 1,
        };

        let result = match self.handlers.get(&node.name) {
            Some(handler) => handler
                .execute(&task)
                .unwrap_or_else(|err| TaskResult::failed(&task, err.to_string())),
            None => TaskResult::failed(&task, format!("no worker for task type {}", node.name)),
        };
        debug!(run_id = %run.id, task = %reference, status = %result.status, "task executed");

        let reason = result.error().map(str::to_string);
        run.record_execution(TaskExecution {
            reference: reference.to_string(),
            task_type: node.name.clone(),
            attempt: attempt + 1,
            status: result.status,
            reason: reason.clone(),
            at: Utc::now(),
        });
        run.observe_order(&result.output_data);
        run.record_task(reference, input, result.output_data);

        match result.status {
            TaskStatus::Completed => {
                run.pending.pop_front();
            }
            TaskStatus::Failed => {
                let failures = run.record_failure(reference);
                let policy = self.retry_policy(&node.name).await;
                let reason = reason.unwrap_or_default();
                if policy.allows_retry(failures) {
                    let delay = policy.delay_for_attempt(failures);
                    warn!(
                        run_id = %run.id,
                        task = %reference,
                        retry = failures,
                        max = policy.retry_count,
                        delay_s = delay.as_secs(),
                        reason = %reason,
                        "retrying task"
                    );
                    if self.backoff {
                        tokio::time::sleep(delay).await;
                    }
                } else {
                    fail(
                        run,
                        format!("{reference} failed after {failures} attempts: {reason}"),
                    )?;
                }
            }
            TaskStatus::FailedWithTerminalError => {
                fail(run, reason.unwrap_or_else(|| format!("{reference} failed")))?;
            }
        }
        Ok(())
    }

    async fn resume(&self, run: &mut WorkflowRun, payload: Fields) -> Result<(), EngineError> {
        let Some(node) = run.pending.pop_front() else {
            return Err(EngineError::NotWaiting(run.id.clone()));
        };
        let reference = node.task_reference_name.as_str();
        let input = run
            .task(reference)
            .map(|record| record.input.clone())
            .unwrap_or_default();
        let mut output = input.clone();
        output.extend(payload);
        run.record_task(reference, input, output.clone());
        run.output = output;
        info!(run_id = %run.id, task = %reference, "signal received");
        self.drive(run).await
    }
}

fn is_waiting(run: &WorkflowRun) -> bool {
    !run.state.is_terminal()
        && run
            .pending
            .front()
            .is_some_and(|node| matches!(node.kind, TaskKind::Wait))
}

fn headers_match(
    expected: &BTreeMap<String, String>,
    received: &BTreeMap<String, String>,
    run: &WorkflowRun,
) -> bool {
    let context = run.context();
    expected.iter().all(|(name, template)| {
        let value = expr::display(&expr::resolve_str(template, &context));
        !value.is_empty()
            && received
                .iter()
                .any(|(key, got)| key.eq_ignore_ascii_case(name) && *got == value)
    })
}

/// Move the run into the state associated with `reference`, if any.
fn enter(run: &mut WorkflowRun, reference: &str) -> Result<(), EngineError> {
    match RunState::for_task(reference) {
        Some(state) if state != run.state => StateMachine::transition(run, state),
        _ => Ok(()),
    }
}

fn fail(run: &mut WorkflowRun, reason: String) -> Result<(), EngineError> {
    warn!(run_id = %run.id, reason = %reason, "workflow run failed");
    StateMachine::transition(run, RunState::FailedTerminal)?;
    run.failure_reason = Some(reason);
    run.pending.clear();
    Ok(())
}

fn execute_switch(run: &mut WorkflowRun, node: &WorkflowTask) -> Result<(), EngineError> {
    let TaskKind::Switch {
        evaluator_type,
        expression,
        decision_cases,
        default_case,
    } = &node.kind
    else {
        return Err(EngineError::Validation(format!(
            "{} is not a switch",
            node.task_reference_name
        )));
    };
    if evaluator_type != VALUE_PARAM_EVALUATOR {
        return fail(
            run,
            format!("unsupported evaluator {evaluator_type} on {}", node.task_reference_name),
        );
    }

    let input = expr::resolve_parameters(&node.input_parameters, &run.context());
    let case = input
        .get(expression)
        .filter(|value| !value.is_null())
        .map(expr::display);
    let branch = case
        .as_ref()
        .and_then(|key| decision_cases.get(key))
        .unwrap_or(default_case);
    debug!(
        run_id = %run.id,
        switch = %node.task_reference_name,
        case = case.as_deref().unwrap_or("<default>"),
        branch_len = branch.len(),
        "switch evaluated"
    );

    run.pending.pop_front();
    for task in branch.iter().rev() {
        run.pending.push_front(task.clone());
    }
    let mut output = Fields::new();
    output.insert(
        "evaluationResult".into(),
        serde_json::json!([case.unwrap_or_default()]),
    );
    run.record_task(&node.task_reference_name, input, output);
    Ok(())
}

fn park(run: &mut WorkflowRun, node: &WorkflowTask) -> Result<(), EngineError> {
    let reference = node.task_reference_name.as_str();
    if run.task(reference).is_some() {
        return Ok(());
    }
    enter(run, reference)?;
    let input = expr::resolve_parameters(&node.input_parameters, &run.context());
    run.record_task(reference, input, Fields::new());
    info!(run_id = %run.id, task = %reference, "awaiting signal");
    Ok(())
}

#[async_trait]
impl WorkflowEngine for LocalEngine {
    async fn register_task_definitions(&self, defs: &[TaskDef]) -> Result<(), EngineError> {
        for def in defs {
            def.validate()?;
        }
        let mut task_defs = self.task_defs.write().await;
        for def in defs {
            task_defs.insert(def.name.clone(), def.clone());
        }
        Ok(())
    }

    async fn update_task_definition(&self, def: &TaskDef) -> Result<(), EngineError> {
        def.validate()?;
        let mut task_defs = self.task_defs.write().await;
        let Some(existing) = task_defs.get_mut(&def.name) else {
            return Err(EngineError::NotFound(format!("task definition {}", def.name)));
        };
        *existing = def.clone();
        Ok(())
    }

    async fn register_workflow_definition(
        &self,
        def: &WorkflowDef,
        overwrite: bool,
    ) -> Result<(), EngineError> {
        def.validate()?;
        let key = (def.name.clone(), def.version);
        let mut workflows = self.workflows.write().await;
        if !overwrite && workflows.contains_key(&key) {
            return Err(EngineError::VersionConflict {
                name: def.name.clone(),
                version: def.version,
            });
        }
        workflows.insert(key, def.clone());
        Ok(())
    }

    async fn start_workflow_run(
        &self,
        request: &StartWorkflowRequest,
    ) -> Result<String, EngineError> {
        let def = self
            .workflows
            .read()
            .await
            .get(&(request.name.clone(), request.version))
            .cloned()
            .ok_or_else(|| {
                EngineError::NotFound(format!("workflow {} version {}", request.name, request.version))
            })?;

        let run = WorkflowRun::new(
            def.name,
            def.version,
            def.tasks,
            request.correlation_id.clone(),
            request.input.clone(),
        );
        let run_id = run.id.clone();
        let handle = Arc::new(Mutex::new(run));
        self.runs
            .write()
            .await
            .insert(run_id.clone(), Arc::clone(&handle));

        info!(run_id = %run_id, workflow = %request.name, "workflow run started");
        let driven = {
            let mut run = handle.lock().await;
            self.drive(&mut run).await
        };
        if let Err(err) = driven {
            self.runs.write().await.remove(&run_id);
            warn!(run_id = %run_id, error = %err, "workflow run abandoned");
            return Err(err);
        }
        Ok(run_id)
    }

    async fn terminate_workflow_run(&self, run_id: &str, reason: &str) -> Result<(), EngineError> {
        let handle = self.handle(run_id).await?;
        let mut run = handle.lock().await;
        StateMachine::transition(&mut run, RunState::Terminated)?;
        run.failure_reason = Some(reason.to_string());
        run.pending.clear();
        info!(run_id = %run_id, reason = %reason, "workflow run terminated");
        Ok(())
    }
}

#[async_trait]
impl WebhookGateway for LocalEngine {
    async fn create_webhook(&self, config: &WebhookConfig) -> Result<(), EngineError> {
        config.validate()?;
        let mut webhooks = self.webhooks.write().await;
        if webhooks.contains_key(&config.id) {
            return Err(EngineError::AlreadyExists(format!("webhook {}", config.id)));
        }
        webhooks.insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn update_webhook(&self, id: &str, config: &WebhookConfig) -> Result<(), EngineError> {
        config.validate()?;
        let mut webhooks = self.webhooks.write().await;
        let Some(existing) = webhooks.get_mut(id) else {
            return Err(EngineError::NotFound(format!("webhook {id}")));
        };
        *existing = config.clone();
        Ok(())
    }
}
