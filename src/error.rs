// src/error.rs
use thiserror::Error;
use xform_model::ModelError;

/// Errors surfaced by the command-line front end.
#[derive(Error, Debug)]
pub enum XformError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}
