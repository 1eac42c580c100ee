use axum::{http::StatusCode, response::Json};
use serde::Serialize;

use crate::model::{ChildKind, MediaKind};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

/// Errors surfaced by portfolio and ingestion operations.
///
/// Client errors carry the offending identifier or rule; server errors keep
/// their details for the log only.
#[derive(Debug, thiserror::Error)]
pub enum PortfolioError {
    #[error("Invalid {kind} ID: '{value}'")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("Portfolio not found: {0}")]
    PortfolioNotFound(String),

    #[error("{} not found: {id}", capitalize(.kind.label()))]
    ChildNotFound { kind: ChildKind, id: String },

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Invalid {kind} format: {content_type}")]
    UnsupportedMediaType {
        kind: MediaKind,
        content_type: String,
    },

    #[error("{} too large (max {} bytes)", capitalize(.kind.as_str()), .limit)]
    PayloadTooLarge { kind: MediaKind, limit: u64 },

    #[error("storage failure: {0:#}")]
    StorageFailure(anyhow::Error),

    #[error("store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl PortfolioError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PortfolioError::InvalidIdentifier { .. }
            | PortfolioError::InvalidField { .. }
            | PortfolioError::UnsupportedMediaType { .. } => StatusCode::BAD_REQUEST,
            PortfolioError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PortfolioError::PortfolioNotFound(_) | PortfolioError::ChildNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            PortfolioError::StorageFailure(_) | PortfolioError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand back to a client.
    pub fn public_message(&self) -> String {
        match self {
            PortfolioError::StorageFailure(_) => "Failed to store uploaded file".to_string(),
            PortfolioError::Store(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<PortfolioError> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: PortfolioError) -> Self {
        let status = err.status_code();
        if status.is_server_error() {
            log::error!("request failed: {:#}", err);
        } else {
            log::debug!("request rejected: {}", err);
        }
        (status, Json(ErrorResponse::new(&err.public_message())))
    }
}
