use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid duration '{input}': expected <number> or <number><unit> (t, ms, s, m, h)")]
    InvalidDuration { input: String },

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Server '{server}': {message}")]
    Control { server: String, message: String },

    #[error("Command '{operation}' timed out after {timeout:?}")]
    CommandTimeout { operation: String, timeout: Duration },

    #[error("Unsupported control API type: {0}")]
    UnsupportedControl(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
