//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use tally_engine::EngineError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An engine error, carrying its stable numeric code.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: u32,
    message: String,
}

/// General-purpose codes for errors raised by the surface itself.
const CODE_BAD_REQUEST: u32 = 190_001;
const CODE_NOT_FOUND: u32 = 190_002;
const CODE_INTERNAL: u32 = 190_003;

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Engine(err) => match err {
                EngineError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
                EngineError::UnknownService { .. }
                | EngineError::CurrencyRequired
                | EngineError::InvalidUserId
                | EngineError::MissingRequiredField(_) => StatusCode::BAD_REQUEST,
                EngineError::OrderNotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::OrderAlreadyExists { .. } => StatusCode::CONFLICT,
                EngineError::LockAcquisitionFailed => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::PaymentServiceUnavailable | EngineError::PaymentCreateFailed(_) => {
                    StatusCode::BAD_GATEWAY
                }
                EngineError::OrderUpdateFailed(_)
                | EngineError::Database(_)
                | EngineError::Cache(_)
                | EngineError::Bus(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> u32 {
        match self {
            Self::BadRequest(_) => CODE_BAD_REQUEST,
            Self::NotFound(_) => CODE_NOT_FOUND,
            Self::Internal(_) => CODE_INTERNAL,
            Self::Engine(err) => err.code(),
        }
    }

    /// Downstream details never cross the boundary verbatim.
    fn public_message(&self) -> String {
        match self {
            Self::Engine(
                err @ (EngineError::Database(_) | EngineError::Cache(_) | EngineError::Bus(_)),
            ) => {
                tracing::error!(code = err.code(), error = %err, "internal engine error");
                "an internal error occurred".to_owned()
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                "an internal error occurred".to_owned()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.public_message(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_codes_pass_through() {
        let err = ApiError::Engine(EngineError::InsufficientBalance {
            balance_cents: 5,
            required_cents: 20,
        });
        assert_eq!(err.code(), 190_102);
        assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn infra_errors_are_masked() {
        let err = ApiError::Engine(EngineError::Database("rocksdb: io error".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "an internal error occurred");
    }

    #[test]
    fn lock_failures_are_retryable_503() {
        let err = ApiError::Engine(EngineError::LockAcquisitionFailed);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
