use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Memory sampling failed: {0}")]
    Sampling(String),

    #[error("Invalid thresholds: warning={warning}, critical={critical}, recovery_margin={recovery_margin}")]
    InvalidThresholds {
        warning: f64,
        critical: f64,
        recovery_margin: f64,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Error for a poisoned lock guarding the named structure
    pub fn poisoned(what: &str) -> Self {
        Self::Internal(format!("{} lock poisoned", what))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            DeliveryError::Validation(_) | DeliveryError::InvalidThresholds { .. } => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            DeliveryError::Serialization(_) => (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR"),
            DeliveryError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            DeliveryError::Compression(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "COMPRESSION_ERROR")
            }
            DeliveryError::Sampling(_) => (StatusCode::SERVICE_UNAVAILABLE, "SAMPLING_ERROR"),
            DeliveryError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let log_message = self.to_string();
        let client_message = if is_production() && status.is_server_error() {
            "Internal server error".to_string()
        } else {
            log_message.clone()
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response = DeliveryError::Validation("empty message".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_sampling_maps_to_unavailable() {
        let response = DeliveryError::Sampling("no proc".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_poisoned_message() {
        let err = DeliveryError::poisoned("buffer");
        assert_eq!(err.to_string(), "Internal error: buffer lock poisoned");
    }
}
