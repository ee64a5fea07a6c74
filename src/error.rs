//! # Error Types
//!
//! Custom error types for dTouch Link using `thiserror`.

use thiserror::Error;

/// Main error type for dTouch Link
#[derive(Debug, Error)]
pub enum DtouchError {
    /// dTouch protocol errors (malformed or truncated payloads)
    #[error("dTouch protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial ports could be opened
    #[error("No serial port found (tried: {0})")]
    SerialPortNotFound(String),

    /// A synchronous read did not complete in time
    #[error("Timed out after {elapsed_ms}ms waiting for {expected} bytes")]
    Timeout { expected: usize, elapsed_ms: u64 },
}

/// Result type alias for dTouch Link
pub type Result<T> = std::result::Result<T, DtouchError>;
