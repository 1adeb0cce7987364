use rust_decimal::Decimal;
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum OrderFlowError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Raised when a task input envelope cannot be turned into a typed order.
#[derive(Debug, Error)]
pub enum DecodingError {
    #[error("missing field `{0}` in task input")]
    MissingField(&'static str),

    #[error("field `{field}` must be an object, got {found}")]
    NotAnObject { field: &'static str, found: String },

    #[error("total must not be negative, got {0}")]
    NegativeTotal(Decimal),

    #[error("amount {0} cannot be represented exactly on the wire")]
    InexactAmount(Decimal),

    #[error("malformed order: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Raised when a task tries to write a verdict that another run of it already wrote.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("{0} verdict already recorded for this order")]
    AlreadyRecorded(&'static str),
}

/// Local handler error. Business-rule and decoding failures never use this;
/// they are reported through the result status.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to encode task output: {0}")]
    Encoding(#[from] serde_json::Error),
}
