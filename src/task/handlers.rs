//! The four business tasks of order fulfillment.
//!
//! Every handler is stateless: it decodes the order from its input, applies one
//! rule and reports the verdict through the result status. Decoding problems
//! become `FAILED` results with `output.error`; they are never returned as errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use super::result::{Task, TaskOutcome, TaskResult};
use crate::error::TaskError;
use crate::model::{CreditVerdict, FraudVerdict, Order, order_from_input, request_from_input};

pub const INTAKE_ORDER: &str = "IntakeOrder";
pub const PRICE_ORDER: &str = "PriceOrder";
pub const FRAUD_CHECK: &str = "FraudCheck";
pub const CREDIT_REVIEW: &str = "CreditReview";

/// Orders above this total are flagged as fraudulent.
pub const FRAUD_LIMIT: Decimal = dec!(400);
/// Orders above this total are refused credit.
pub const CREDIT_LIMIT: Decimal = dec!(300);
pub const APPROVED_CREDIT: Decimal = dec!(150.00);

pub const FRAUD_REASON: &str = "Too much money";
pub const CREDIT_APPROVED_REASON: &str = "Good Customer";
pub const CREDIT_DENIED_REASON: &str = "Collateral not on hand";

/// A named unit of work a worker can execute.
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, task: &Task) -> Result<TaskResult, TaskError>;
}

pub struct IntakeOrder;

impl TaskHandler for IntakeOrder {
    fn name(&self) -> &'static str {
        INTAKE_ORDER
    }

    fn execute(&self, task: &Task) -> Result<TaskResult, TaskError> {
        debug!(task = %task.task_id, "received order request");
        let outcome = match request_from_input(&task.input_data) {
            Ok(request) => {
                let order = Order::from_request(&request);
                info!(order = %order.number(), ordered_by = %order.ordered_by(), "order accepted");
                TaskOutcome::Completed(order)
            }
            Err(err) => {
                warn!(task = %task.task_id, error = %err, "rejecting malformed order request");
                TaskOutcome::Retryable(err.to_string())
            }
        };
        TaskResult::from_outcome(task, outcome)
    }
}

pub struct PriceOrder;

impl TaskHandler for PriceOrder {
    fn name(&self) -> &'static str {
        PRICE_ORDER
    }

    fn execute(&self, task: &Task) -> Result<TaskResult, TaskError> {
        let outcome = match order_from_input(&task.input_data) {
            Ok(mut order) => {
                if order.ensure_priced(|| random_price(&mut rand::thread_rng())) {
                    info!(order = %order.number(), total = %order.total(), "priced order");
                }
                TaskOutcome::Completed(order)
            }
            Err(err) => TaskOutcome::Retryable(err.to_string()),
        };
        TaskResult::from_outcome(task, outcome)
    }
}

pub struct FraudCheck;

impl TaskHandler for FraudCheck {
    fn name(&self) -> &'static str {
        FRAUD_CHECK
    }

    fn execute(&self, task: &Task) -> Result<TaskResult, TaskError> {
        let mut order = match order_from_input(&task.input_data) {
            Ok(order) => order,
            Err(err) => return TaskResult::from_outcome(task, TaskOutcome::Retryable(err.to_string())),
        };

        info!(order = %order.number(), "performing fraud check");
        let verdict = assess_fraud(order.total());
        let fraudulent = verdict.fraudulent;
        if let Err(err) = order.metadata_mut().record_fraud(verdict) {
            return TaskResult::from_outcome(task, TaskOutcome::Retryable(err.to_string()));
        }

        let outcome = if fraudulent {
            warn!(order = %order.number(), total = %order.total(), "order flagged as fraudulent");
            TaskOutcome::Terminal {
                order,
                reason: FRAUD_REASON.to_string(),
            }
        } else {
            TaskOutcome::Completed(order)
        };
        TaskResult::from_outcome(task, outcome)
    }
}

pub struct CreditReview;

impl TaskHandler for CreditReview {
    fn name(&self) -> &'static str {
        CREDIT_REVIEW
    }

    fn execute(&self, task: &Task) -> Result<TaskResult, TaskError> {
        let mut order = match order_from_input(&task.input_data) {
            Ok(order) => order,
            Err(err) => return TaskResult::from_outcome(task, TaskOutcome::Retryable(err.to_string())),
        };

        info!(order = %order.number(), "performing credit review");
        let verdict = review_credit(order.total());
        let extended = verdict.credit_extended;
        if let Err(err) = order.metadata_mut().record_credit_review(verdict) {
            return TaskResult::from_outcome(task, TaskOutcome::Retryable(err.to_string()));
        }

        let outcome = if extended {
            TaskOutcome::Completed(order)
        } else {
            warn!(order = %order.number(), total = %order.total(), "credit denied");
            TaskOutcome::Terminal {
                order,
                reason: CREDIT_DENIED_REASON.to_string(),
            }
        };
        TaskResult::from_outcome(task, outcome)
    }
}

/// Price drawn uniformly from (10.00, 400.00] in whole cents.
pub fn random_price<R: Rng + ?Sized>(rng: &mut R) -> Decimal {
    Decimal::new(rng.gen_range(1001..=40000), 2)
}

pub fn assess_fraud(total: Decimal) -> FraudVerdict {
    let fraudulent = total > FRAUD_LIMIT;
    FraudVerdict {
        fraudulent,
        reason: fraudulent.then(|| FRAUD_REASON.to_string()),
    }
}

pub fn review_credit(total: Decimal) -> CreditVerdict {
    if total <= CREDIT_LIMIT {
        CreditVerdict {
            credit_extended: true,
            reason: Some(CREDIT_APPROVED_REASON.to_string()),
            amount: Some(APPROVED_CREDIT),
        }
    } else {
        CreditVerdict {
            credit_extended: false,
            reason: Some(CREDIT_DENIED_REASON.to_string()),
            amount: None,
        }
    }
}

/// Handlers by task name.
#[derive(Clone, Default)]
pub struct TaskHandlers {
    handlers: BTreeMap<&'static str, Arc<dyn TaskHandler>>,
}

impl TaskHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four order-fulfillment handlers.
    pub fn order_fulfillment() -> Self {
        Self::new()
            .with(Arc::new(IntakeOrder))
            .with(Arc::new(PriceOrder))
            .with(Arc::new(FraudCheck))
            .with(Arc::new(CreditReview))
    }

    pub fn with(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.name(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TaskHandler>> {
        self.handlers.values()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Fields, OrderRequest, Payment, to_output_envelope};
    use crate::task::TaskStatus;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    fn order_with_total(total: Decimal) -> Order {
        Order::from_request(&OrderRequest {
            ordered_by: "Dana Whitfield".into(),
            total,
            delivery_zip: "60606".into(),
            payment: Some(Payment::on_account("1287879798798")),
        })
    }

    fn task_for(order: &Order, task_type: &str) -> Task {
        Task {
            task_id: format!("{task_type}-1"),
            task_type: task_type.into(),
            reference_task_name: task_type.into(),
            workflow_instance_id: "wf-1".into(),
            input_data: to_output_envelope(order).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn intake_builds_order_from_request() {
        let task = Task {
            task_id: "intake-1".into(),
            input_data: match json!({"order": {
                "orderedBy": "Dana Whitfield",
                "total": 50,
                "deliveryZip": "60606",
                "payment": {"type": "CREDIT_CARD", "creditCard": "tok_4242"}
            }}) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            },
            ..Default::default()
        };

        let result = IntakeOrder.execute(&task).unwrap();
        assert_eq!(result.status, TaskStatus::Completed);

        let order = result.order().unwrap();
        assert!(!order.number().is_empty());
        assert_eq!(order.total(), dec!(50));
        assert!(order.metadata().fraud().is_none());
    }

    #[test]
    fn intake_reports_malformed_input_as_failed_result() {
        let task = Task {
            task_id: "intake-2".into(),
            input_data: Fields::new(),
            ..Default::default()
        };

        let result = IntakeOrder.execute(&task).unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(!result.error().unwrap().is_empty());
        assert!(!result.output_data.contains_key("order"));
    }

    #[test]
    fn price_fills_unpriced_order() {
        let order = order_with_total(Decimal::ZERO);
        let result = PriceOrder.execute(&task_for(&order, PRICE_ORDER)).unwrap();

        assert_eq!(result.status, TaskStatus::Completed);
        let priced = result.order().unwrap();
        assert!(priced.total() > dec!(10) && priced.total() <= dec!(400));
        assert!(priced.total().scale() <= 2);
        assert_eq!(priced.number(), order.number());
    }

    #[test]
    fn price_leaves_priced_order_alone() {
        let order = order_with_total(dec!(50));
        let result = PriceOrder.execute(&task_for(&order, PRICE_ORDER)).unwrap();
        assert_eq!(result.order().unwrap(), order);
    }

    #[test]
    fn random_price_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let price = random_price(&mut rng);
            assert!(price > dec!(10), "{price} too low");
            assert!(price <= dec!(400), "{price} too high");
            assert_eq!(price.round_dp(2), price);
        }
    }

    #[test]
    fn fraud_threshold_is_inclusive_at_400() {
        let at_limit = order_with_total(dec!(400.00));
        let result = FraudCheck.execute(&task_for(&at_limit, FRAUD_CHECK)).unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        let verdict = result.order().unwrap().metadata().fraud().cloned().unwrap();
        assert!(!verdict.fraudulent);
        assert_eq!(verdict.reason, None);

        let over = order_with_total(dec!(400.01));
        let result = FraudCheck.execute(&task_for(&over, FRAUD_CHECK)).unwrap();
        assert_eq!(result.status, TaskStatus::FailedWithTerminalError);
        assert_eq!(result.error(), Some(FRAUD_REASON));
        let verdict = result.order().unwrap().metadata().fraud().cloned().unwrap();
        assert!(verdict.fraudulent);
        assert_eq!(verdict.reason.as_deref(), Some(FRAUD_REASON));
    }

    #[test]
    fn credit_threshold_is_inclusive_at_300() {
        let at_limit = order_with_total(dec!(300.00));
        let result = CreditReview.execute(&task_for(&at_limit, CREDIT_REVIEW)).unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        let verdict = result
            .order()
            .unwrap()
            .metadata()
            .credit_review()
            .cloned()
            .unwrap();
        assert!(verdict.credit_extended);
        assert_eq!(verdict.amount, Some(dec!(150.00)));
        assert_eq!(verdict.reason.as_deref(), Some(CREDIT_APPROVED_REASON));

        let over = order_with_total(dec!(300.01));
        let result = CreditReview.execute(&task_for(&over, CREDIT_REVIEW)).unwrap();
        assert_eq!(result.status, TaskStatus::FailedWithTerminalError);
        let verdict = result
            .order()
            .unwrap()
            .metadata()
            .credit_review()
            .cloned()
            .unwrap();
        assert!(!verdict.credit_extended);
        assert_eq!(verdict.amount, None);
        assert_eq!(verdict.reason.as_deref(), Some(CREDIT_DENIED_REASON));
    }

    #[test]
    fn fraud_check_does_not_overwrite_existing_verdict() {
        let mut order = order_with_total(dec!(999));
        order
            .metadata_mut()
            .record_fraud(FraudVerdict {
                fraudulent: false,
                reason: None,
            })
            .unwrap();

        let result = FraudCheck.execute(&task_for(&order, FRAUD_CHECK)).unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(!result.output_data.contains_key("order"));
    }

    #[test]
    fn verdict_handlers_report_decode_errors_as_failed() {
        let task = Task {
            input_data: match json!({"order": {"number": "1", "total": "many"}}) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            },
            ..Default::default()
        };

        for handler in TaskHandlers::order_fulfillment().iter() {
            let result = handler.execute(&task).unwrap();
            assert_eq!(result.status, TaskStatus::Failed, "{}", handler.name());
            assert!(result.error().is_some());
        }
    }

    #[test]
    fn registry_holds_all_four_handlers() {
        let handlers = TaskHandlers::order_fulfillment();
        assert_eq!(handlers.len(), 4);
        for name in [INTAKE_ORDER, PRICE_ORDER, FRAUD_CHECK, CREDIT_REVIEW] {
            assert_eq!(handlers.get(name).unwrap().name(), name);
        }
        assert!(handlers.get("ShipOrder").is_none());
    }
}
