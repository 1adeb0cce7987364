//! Errors reported by an orchestration engine, remote or local.
//!
//! Conflicts are typed per operation: registering an existing workflow version
//! yields [`EngineError::VersionConflict`], creating an existing webhook yields
//! [`EngineError::AlreadyExists`]. Callers rely on that distinction to decide
//! whether an update is the right fallback.

use thiserror::Error;

use crate::workflow::RunState;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Any HTTP failure not covered by a more specific variant.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("workflow {name} version {version} is already registered")]
    VersionConflict { name: String, version: u32 },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal run transition from {from} to {to}")]
    IllegalTransition { from: RunState, to: RunState },

    #[error("unknown run {0}")]
    UnknownRun(String),

    #[error("run {0} is not awaiting a signal")]
    NotWaiting(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
