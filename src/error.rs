//! # Error Types
//!
//! Custom error types for Tempmon using `thiserror`.

use thiserror::Error;

use crate::reading::ExtractError;
use crate::transaction::TransactionError;

/// Exit code for configuration and local file errors
pub const EXIT_IO_ERROR: u8 = 1;

/// Exit code when the instrument cannot be opened
pub const EXIT_DEVICE_OPEN_ERROR: u8 = 2;

/// Exit code when the instrument could not be read
pub const EXIT_DEVICE_READ_ERROR: u8 = 3;

/// Exit code for server fetch and upload failures
pub const EXIT_SERVER_ERROR: u8 = 4;

/// Main error type for Tempmon
#[derive(Debug, Error)]
pub enum TempmonError {
    /// Frame construction errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request/response exchange with the instrument failed
    #[error("Transaction failed: {0}")]
    Transaction(#[from] TransactionError),

    /// Reply could not be turned into a reading
    #[error("Invalid reading: {0}")]
    Reading(#[from] ExtractError),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Server returned something unusable
    #[error("Server error: {0}")]
    Server(String),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Reading record (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TempmonError {
    /// Process exit code reported for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            TempmonError::Config(_) | TempmonError::Json(_) | TempmonError::Io(_) => EXIT_IO_ERROR,
            TempmonError::Serial(_) | TempmonError::SerialPortNotFound(_) => EXIT_DEVICE_OPEN_ERROR,
            TempmonError::Protocol(_)
            | TempmonError::Transaction(_)
            | TempmonError::Reading(_) => EXIT_DEVICE_READ_ERROR,
            TempmonError::Server(_) | TempmonError::Http(_) => EXIT_SERVER_ERROR,
        }
    }
}

/// Result type alias for Tempmon
pub type Result<T> = std::result::Result<T, TempmonError>;
