pub mod definition;
pub mod expr;
pub mod order_flow;
pub mod run;
pub mod state;

pub use definition::{
    RetryLogic, RetryPolicy, TaskDef, TaskKind, WorkflowBuilder, WorkflowDef, WorkflowTask,
};
pub use order_flow::{CONFIRMED_SIGNAL, CREDIT_REVIEW_DECISION, OrderWorkflow};
pub use run::{AuditRecord, TaskExecution, TaskRecord, WorkflowRun};
pub use state::{RunState, StateMachine};
