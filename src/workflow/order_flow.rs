//! The order fulfillment graph:
//!
//! IntakeOrder → PriceOrder → FraudCheck → switch(payment type)
//!   ON_ACCOUNT → CreditReview
//! → ConfirmedSignal (wait)

use crate::engine::EngineError;
use crate::model::ORDER_KEY;
use crate::task::{CREDIT_REVIEW, FRAUD_CHECK, INTAKE_ORDER, PRICE_ORDER};

use super::definition::{RetryPolicy, TaskDef, WorkflowBuilder, WorkflowDef, WorkflowTask};

pub const DEFAULT_WORKFLOW_NAME: &str = "OrderDemoWrkFlow";
pub const CREDIT_REVIEW_DECISION: &str = "CreditReviewDecision";
pub const CONFIRMED_SIGNAL: &str = "ConfirmedSignal";
pub const REQUEST_KEY: &str = "request";
pub const ON_ACCOUNT_CASE: &str = "ON_ACCOUNT";
/// Intake tolerates a flaky upstream longer than the other steps.
pub const INTAKE_RETRY_COUNT: u32 = 6;

/// Everything that must be registered for the order workflow to run.
#[derive(Debug, Clone)]
pub struct OrderWorkflow {
    pub workflow: WorkflowDef,
    pub task_defs: Vec<TaskDef>,
}

pub fn definition(
    name: &str,
    version: u32,
    owner_email: Option<String>,
) -> Result<OrderWorkflow, EngineError> {
    let intake = WorkflowTask::simple(INTAKE_ORDER)
        .input(ORDER_KEY, format!("${{workflow.input.{REQUEST_KEY}}}"));
    let price =
        WorkflowTask::simple(PRICE_ORDER).input(ORDER_KEY, order_of(INTAKE_ORDER));
    let fraud = WorkflowTask::simple(FRAUD_CHECK).input(ORDER_KEY, order_of(PRICE_ORDER));
    let credit =
        WorkflowTask::simple(CREDIT_REVIEW).input(ORDER_KEY, order_of(FRAUD_CHECK));
    let decision = WorkflowTask::switch(
        CREDIT_REVIEW_DECISION,
        format!("${{{FRAUD_CHECK}.output.{ORDER_KEY}.payment.type}}"),
        [(ON_ACCOUNT_CASE.to_string(), vec![credit])],
        Vec::new(),
    );
    let confirmed = WorkflowTask::wait(CONFIRMED_SIGNAL).input(ORDER_KEY, order_of(INTAKE_ORDER));

    let workflow = WorkflowBuilder::new(name)
        .version(version)
        .description("Order fulfillment: intake, pricing, fraud and credit review")
        .owner_email(owner_email.clone())
        .add(intake)
        .add(price)
        .add(fraud)
        .add(decision)
        .add(confirmed)
        .build()?;

    let task_defs = workflow
        .all_tasks()
        .into_iter()
        .filter(|task| task.is_simple())
        .map(|task| {
            let retry = if task.name == INTAKE_ORDER {
                RetryPolicy::exponential(INTAKE_RETRY_COUNT)
            } else {
                RetryPolicy::default()
            };
            TaskDef::new(task.name.clone())
                .description(format!("{} worker", task.name))
                .retry(retry)
                .owner_email(owner_email.clone())
        })
        .collect();

    Ok(OrderWorkflow {
        workflow,
        task_defs,
    })
}

/// Expression for the order a task produced.
pub fn order_of(reference: &str) -> String {
    format!("${{{reference}.output.{ORDER_KEY}}}")
}

/// Expression for the number of the order a task produced.
pub fn order_number_of(reference: &str) -> String {
    format!("${{{reference}.output.{ORDER_KEY}.number}}")
}
