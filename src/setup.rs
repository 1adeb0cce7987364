//! Bootstrap: register the order workflow and its confirmation webhook, and
//! kick off runs for generated sample orders.

use std::collections::BTreeMap;

use rand::Rng;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::OrderFlowConfig;
use crate::engine::{
    EngineError, StartWorkflowRequest, WebhookConfig, WebhookGateway, WorkflowEngine,
};
use crate::error::OrderFlowError;
use crate::model::{Fields, OrderRequest, Payment};
use crate::task::INTAKE_ORDER;
use crate::workflow::OrderWorkflow;
use crate::workflow::order_flow::{self, REQUEST_KEY};

pub const WEBHOOK_NAME: &str = "OrderConfirmed";
pub const WEBHOOK_ORDER_HEADER: &str = "order";
pub const SAMPLE_ZIP: &str = "60606";
pub const SAMPLE_CARD: &str = "ouroieqwuoiruqwerqwerqw";
pub const SAMPLE_ACCOUNT: &str = "1287879798798";

/// What [`ensure_webhook`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAction {
    Created,
    Updated,
}

/// Register task definitions, push their retry policies, then register the
/// workflow itself, overwriting any existing definition of the same version.
pub async fn register_order_workflow(
    engine: &dyn WorkflowEngine,
    config: &OrderFlowConfig,
) -> Result<OrderWorkflow, OrderFlowError> {
    let flow = order_flow::definition(
        &config.workflow_name,
        config.workflow_version,
        config.owner_email.clone(),
    )?;

    engine.register_task_definitions(&flow.task_defs).await?;
    for def in &flow.task_defs {
        engine.update_task_definition(def).await?;
    }
    engine
        .register_workflow_definition(&flow.workflow, true)
        .await?;

    info!(
        workflow = %flow.workflow.name,
        version = flow.workflow.version,
        tasks = flow.task_defs.len(),
        "registered order workflow"
    );
    Ok(flow)
}

/// Webhook that confirms a waiting run whose intake order number matches the `order` header.
pub fn order_confirmed_webhook(config: &OrderFlowConfig) -> WebhookConfig {
    WebhookConfig::header_based(config.webhook_id.clone(), WEBHOOK_NAME)
        .header(WEBHOOK_ORDER_HEADER, order_flow::order_number_of(INTAKE_ORDER))
        .receiver(config.workflow_name.clone(), config.workflow_version)
}

/// Create the webhook, updating it instead when it already exists.
pub async fn ensure_webhook(
    gateway: &dyn WebhookGateway,
    hook: &WebhookConfig,
) -> Result<WebhookAction, EngineError> {
    match gateway.create_webhook(hook).await {
        Ok(()) => {
            info!(webhook = %hook.id, "created webhook");
            Ok(WebhookAction::Created)
        }
        Err(EngineError::AlreadyExists(_)) => {
            gateway.update_webhook(&hook.id, hook).await?;
            info!(webhook = %hook.id, "updated existing webhook");
            Ok(WebhookAction::Updated)
        }
        Err(err) => Err(err),
    }
}

/// Demo orders: totals in (10.00, 500.00], the second order left unpriced,
/// card and account payments alternating.
pub fn sample_requests<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<OrderRequest> {
    (0..count)
        .map(|i| {
            let total = if i == 1 {
                Decimal::ZERO
            } else {
                Decimal::new(rng.gen_range(1001..=50000), 2)
            };
            let payment = if i % 2 == 0 {
                Payment::credit_card(SAMPLE_CARD)
            } else {
                Payment::on_account(SAMPLE_ACCOUNT)
            };
            OrderRequest {
                ordered_by: format!("Sample Customer {i}"),
                total,
                delivery_zip: SAMPLE_ZIP.to_string(),
                payment: Some(payment),
            }
        })
        .collect()
}

/// Start request carrying `request` under the workflow input key, with a fresh correlation id.
pub fn start_request(
    config: &OrderFlowConfig,
    request: &OrderRequest,
) -> Result<StartWorkflowRequest, serde_json::Error> {
    let mut input = Fields::new();
    input.insert(REQUEST_KEY.to_string(), serde_json::to_value(request)?);
    Ok(
        StartWorkflowRequest::new(config.workflow_name.clone(), config.workflow_version, input)
            .correlation_id(Uuid::new_v4().to_string()),
    )
}

/// Start one run per request. A failed start is logged and skipped.
pub async fn start_runs(
    engine: &dyn WorkflowEngine,
    config: &OrderFlowConfig,
    requests: &[OrderRequest],
) -> Result<Vec<String>, OrderFlowError> {
    let mut run_ids = Vec::with_capacity(requests.len());
    for request in requests {
        let start = start_request(config, request)?;
        match engine.start_workflow_run(&start).await {
            Ok(run_id) => {
                info!(run_id = %run_id, ordered_by = %request.ordered_by, total = %request.total, "started run");
                run_ids.push(run_id);
            }
            Err(err) => {
                warn!(ordered_by = %request.ordered_by, error = %err, "failed to start run");
            }
        }
    }
    Ok(run_ids)
}

/// Headers a caller sends to the confirmation webhook for `order_number`.
pub fn confirmation_headers(order_number: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(WEBHOOK_ORDER_HEADER.to_string(), order_number.to_string());
    headers
}

/// Payload delivered with a confirmation.
pub fn confirmation_payload() -> Fields {
    let mut payload = Fields::new();
    payload.insert("confirmed".into(), Value::Bool(true));
    payload
}
