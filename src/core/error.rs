use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZionError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Lock contention: {0}")]
    LockContention(String),
    #[error("Corrupt state: {0}")]
    CorruptState(String),
}
