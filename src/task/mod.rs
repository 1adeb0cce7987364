pub mod handlers;
pub mod result;

pub use handlers::{
    APPROVED_CREDIT, CREDIT_LIMIT, CREDIT_REVIEW, CreditReview, FRAUD_CHECK, FRAUD_LIMIT,
    FraudCheck, INTAKE_ORDER, IntakeOrder, PRICE_ORDER, PriceOrder, TaskHandler, TaskHandlers,
};
pub use result::{Task, TaskOutcome, TaskResult, TaskStatus};
