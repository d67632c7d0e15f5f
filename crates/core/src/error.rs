//! Core error types

use thiserror::Error;

/// Core error type for PcrBind
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration rejected by validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Error = CoreError;

pub type Result<T> = std::result::Result<T, CoreError>;
