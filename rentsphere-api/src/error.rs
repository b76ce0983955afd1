use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rentsphere_core::payment::GatewayError;
use rentsphere_rental::{BookingError, SettlementError};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthorizationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFoundError(String),
    #[error("{0}")]
    ConflictError(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("{0}")]
    GatewayTimeout(String),
    #[error("{0}")]
    InternalServerError(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::BadGateway(msg) => {
                tracing::error!("Upstream failure: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            AppError::GatewayTimeout(msg) => {
                tracing::error!("Upstream timeout: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, msg)
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        let msg = err.to_string();
        match err {
            BookingError::ItemNotFound(_) | BookingError::RentalNotFound(_) => AppError::NotFoundError(msg),
            BookingError::ItemUnavailable(_) | BookingError::InvalidRange(_) => AppError::ValidationError(msg),
            BookingError::Forbidden(_) => AppError::AuthorizationError(msg),
            BookingError::AlreadyPaid(_) | BookingError::Conflict { .. } => AppError::ConflictError(msg),
            BookingError::GatewayTimeout | BookingError::Gateway(GatewayError::Timeout) => {
                AppError::GatewayTimeout(msg)
            }
            BookingError::Gateway(_) => AppError::BadGateway(msg),
            BookingError::Store(_) => AppError::InternalServerError(msg),
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            // Already logged at warn by the reconciler
            SettlementError::InvalidSignature(_) => AppError::ValidationError(err.to_string()),
            SettlementError::ItemFlipFailed { .. } | SettlementError::Store(_) => {
                AppError::InternalServerError(err.to_string())
            }
        }
    }
}
