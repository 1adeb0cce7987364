use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::task::{CREDIT_REVIEW, FRAUD_CHECK, INTAKE_ORDER, PRICE_ORDER};

use super::order_flow::CONFIRMED_SIGNAL;
use super::run::WorkflowRun;

/// Lifecycle of one order run.
///
/// Created → Intaking → Pricing → FraudChecking → [CreditReviewing] →
/// AwaitingConfirmation → Completed. Any working state may fail terminally and
/// any non-terminal state may be terminated by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Created,
    Intaking,
    Pricing,
    FraudChecking,
    CreditReviewing,
    AwaitingConfirmation,
    Completed,
    FailedTerminal,
    Terminated,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Created => write!(f, "CREATED"),
            RunState::Intaking => write!(f, "INTAKING"),
            RunState::Pricing => write!(f, "PRICING"),
            RunState::FraudChecking => write!(f, "FRAUD_CHECKING"),
            RunState::CreditReviewing => write!(f, "CREDIT_REVIEWING"),
            RunState::AwaitingConfirmation => write!(f, "AWAITING_CONFIRMATION"),
            RunState::Completed => write!(f, "COMPLETED"),
            RunState::FailedTerminal => write!(f, "FAILED_TERMINAL"),
            RunState::Terminated => write!(f, "TERMINATED"),
        }
    }
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::FailedTerminal | RunState::Terminated
        )
    }

    /// True while a worker task is in flight.
    pub fn is_working(self) -> bool {
        matches!(
            self,
            RunState::Intaking
                | RunState::Pricing
                | RunState::FraudChecking
                | RunState::CreditReviewing
        )
    }

    /// State a run enters when the node with `reference` is scheduled.
    pub fn for_task(reference: &str) -> Option<RunState> {
        match reference {
            INTAKE_ORDER => Some(RunState::Intaking),
            PRICE_ORDER => Some(RunState::Pricing),
            FRAUD_CHECK => Some(RunState::FraudChecking),
            CREDIT_REVIEW => Some(RunState::CreditReviewing),
            CONFIRMED_SIGNAL => Some(RunState::AwaitingConfirmation),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Created, Intaking)
            | (Intaking, Pricing)
            | (Pricing, FraudChecking)
            | (FraudChecking, CreditReviewing)
            | (FraudChecking, AwaitingConfirmation)
            | (CreditReviewing, AwaitingConfirmation)
            | (AwaitingConfirmation, Completed) => true,
            (from, FailedTerminal) => from.is_working(),
            (from, Terminated) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Applies transitions to a run, rejecting edges the lifecycle does not allow.
pub struct StateMachine;

impl StateMachine {
    pub fn transition(run: &mut WorkflowRun, next: RunState) -> Result<(), EngineError> {
        if !run.state.can_transition_to(next) {
            return Err(EngineError::IllegalTransition {
                from: run.state,
                to: next,
            });
        }
        run.state_history.push(run.state);
        run.state = next;
        run.touch();
        Ok(())
    }
}
