//! Error types for the Tushare execution engine.
//!
//! Every fallible engine operation returns [`EngineResult`]. Provider-side
//! failures are kept in their own [`ProviderError`] so the step executor can
//! isolate them per call instead of failing the whole run.

use thiserror::Error;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Table name rejected before any DDL was issued
    #[error("Invalid table name: {0}")]
    InvalidIdentifier(String),

    /// Provider call error
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV/Excel encoding error
    #[error("Output error: {0}")]
    Output(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<csv::Error> for EngineError {
    fn from(err: csv::Error) -> Self {
        EngineError::Output(format!("csv: {}", err))
    }
}

impl From<rust_xlsxwriter::XlsxError> for EngineError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        EngineError::Output(format!("xlsx: {}", err))
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

/// Errors raised at the provider boundary.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport failure talking to the provider.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider rejected the call.
    #[error("API error {code}: {msg}")]
    Api { code: i64, msg: String },

    /// No auth token was configured.
    #[error("TUSHARE_TOKEN is not set")]
    MissingToken,

    /// A client-side function was asked for something it cannot route.
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// The response did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),
}
