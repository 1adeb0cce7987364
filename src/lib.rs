//! Order fulfillment on a workflow engine: typed order model, the four task
//! handlers, the workflow definition and clients for running it remotely or
//! in process.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod setup;
pub mod task;
pub mod ui;
pub mod worker;
pub mod workflow;

pub use error::OrderFlowError;
