use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::models::Amount;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("don't provide secret seed")]
    SecretSupplied,

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Account creation timed out: {0}")]
    CreationTimeout(String),

    #[error("Account {address} created with balance {observed}, expected {expected}")]
    BalanceMismatch {
        address: String,
        expected: Amount,
        observed: Amount,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors returned by the remote ledger boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The node understood the request and refused it (bad sequence, insufficient
    /// funds, malformed operation).
    #[error("rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Whether the same request may succeed if simply repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Transport(_) | LedgerError::Status { .. } | LedgerError::NotFound(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound(_))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            LedgerError::Decode(error.to_string())
        } else {
            LedgerError::Transport(error.to_string())
        }
    }
}

/// Outcome of a failed batch submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("failed to load source account {source_address}: {error}")]
    SourceUnavailable {
        source_address: String,
        error: LedgerError,
    },

    #[error("transaction {hash} rejected: {error}")]
    Rejected { hash: String, error: LedgerError },

    #[error("transaction {hash} not confirmed within {timeout_ms}ms")]
    Timeout { hash: String, timeout_ms: u128 },

    #[error("account {target} has balance {observed}, expected {expected} (tx {hash})")]
    Mismatch {
        hash: String,
        target: String,
        expected: Amount,
        observed: Amount,
    },

    #[error("failed to build transaction: {0}")]
    Build(String),
}

impl SubmitError {
    /// Whether the transaction might still land after this error was reported.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, SubmitError::Timeout { .. } | SubmitError::Mismatch { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid base58 encoding: {0}")]
    Encoding(String),

    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("public key does not match secret seed")]
    PublicKeyMismatch,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            AppError::InvalidAddress(_) => (StatusCode::BAD_REQUEST, "INVALID_ADDRESS"),
            AppError::SecretSupplied => (StatusCode::BAD_REQUEST, "SECRET_SUPPLIED"),
            AppError::AccountExists(_) => (StatusCode::BAD_REQUEST, "ACCOUNT_EXISTS"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::CreationTimeout(_) => (StatusCode::BAD_REQUEST, "CREATION_TIMEOUT"),
            AppError::BalanceMismatch { .. } => (StatusCode::BAD_REQUEST, "BALANCE_MISMATCH"),
            AppError::Ledger(_) => (StatusCode::BAD_GATEWAY, "LEDGER_ERROR"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "An internal error occurred".to_string(),
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
