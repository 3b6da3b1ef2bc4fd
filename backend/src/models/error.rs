use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Failure body returned to callers. Success and failure are told apart by
/// the presence of the `error` key.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Models not loaded properly")]
    ServiceNotReady,

    #[error("{collaborator} failed: {detail}")]
    PerceptionFailure {
        collaborator: &'static str,
        detail: String,
    },

    #[error("{collaborator} returned {actual:?}, expected {expected:?}")]
    PerceptionMismatch {
        collaborator: &'static str,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("garment canvas {garment:?} does not match person canvas {person:?}")]
    ConditioningSizeMismatch {
        person: (u32, u32),
        garment: (u32, u32),
    },

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("Generation exceeded {0}s")]
    GenerationTimeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) | AppError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ServiceNotReady => StatusCode::SERVICE_UNAVAILABLE,
            AppError::GenerationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::PerceptionFailure { .. }
            | AppError::PerceptionMismatch { .. }
            | AppError::ConditioningSizeMismatch { .. }
            | AppError::GenerationFailure(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller. Collaborator faults are only logged in
    /// detail; callers see a generic processing failure.
    pub fn public_message(&self) -> String {
        match self {
            AppError::InvalidInput(_)
            | AppError::InvalidImage(_)
            | AppError::PayloadTooLarge
            | AppError::ServiceNotReady => self.to_string(),
            AppError::GenerationFailure(_) => {
                "Processing failed: inference failed to generate result".to_string()
            }
            AppError::GenerationTimeout(_) => {
                "Processing failed: generation timed out".to_string()
            }
            AppError::PerceptionFailure { .. }
            | AppError::PerceptionMismatch { .. }
            | AppError::ConditioningSizeMismatch { .. }
            | AppError::Internal(_) => "Processing failed: inference pipeline error".to_string(),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.public_message(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::info!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(self.to_body())).into_response()
    }
}
