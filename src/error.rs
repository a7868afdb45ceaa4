use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    models::{
        common::ErrorResponse,
        validation::{ErrorCode, ErrorDetails},
    },
    services::validation_errors::{
        classify_server_error, ClassifiedError, PlatformError, REASON_ENTITLEMENT_STORE_UNAVAILABLE,
        REASON_INVALID_ARGUMENT, REASON_INVALID_PURCHASE_STATE, REASON_PURCHASE_VALIDATION_FAILED,
        REASON_UNKNOWN_PRODUCT,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Invalid purchase state: {0}")]
    InvalidPurchaseState(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Billing platform error: {source}")]
    Platform {
        classified: ClassifiedError,
        source: PlatformError,
    },

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<PlatformError> for ApiError {
    fn from(source: PlatformError) -> Self {
        ApiError::Platform {
            classified: classify_server_error(&source),
            source,
        }
    }
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            // The purchase is already confirmed by the platform; the overwrite is safe to redo
            ApiError::Database(_) => ErrorCode::Unavailable,
            ApiError::InvalidArgument(_)
            | ApiError::UnknownProduct(_)
            | ApiError::InvalidPurchaseState(_) => ErrorCode::InvalidArgument,
            ApiError::Unauthenticated(_) => ErrorCode::Unauthenticated,
            ApiError::Platform { classified, .. } => classified.code,
            ApiError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn details(&self) -> Option<ErrorDetails> {
        let (reason, retryable, status_code) = match self {
            ApiError::Database(_) => (REASON_ENTITLEMENT_STORE_UNAVAILABLE, true, None),
            ApiError::InvalidArgument(_) => (REASON_INVALID_ARGUMENT, false, None),
            ApiError::UnknownProduct(_) => (REASON_UNKNOWN_PRODUCT, false, None),
            ApiError::InvalidPurchaseState(_) => (REASON_INVALID_PURCHASE_STATE, false, None),
            ApiError::Unauthenticated(_) => return None,
            ApiError::Platform { classified, .. } => (
                classified.reason,
                classified.retryable,
                classified.status_code,
            ),
            ApiError::Internal(_) => (REASON_PURCHASE_VALIDATION_FAILED, false, None),
        };

        Some(ErrorDetails {
            reason: Some(reason.to_string()),
            retryable,
            status_code,
        })
    }

    pub fn status(&self) -> StatusCode {
        match self.code() {
            ErrorCode::InvalidArgument | ErrorCode::FailedPrecondition => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Database(_) => "Entitlement storage temporarily unavailable".to_string(),
            ApiError::InvalidArgument(msg)
            | ApiError::InvalidPurchaseState(msg)
            | ApiError::Unauthenticated(msg) => msg.clone(),
            ApiError::UnknownProduct(product_id) => format!("Unknown product: {}", product_id),
            ApiError::Platform { classified, .. } => classified.message().to_string(),
            ApiError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
            }
            ApiError::Platform {
                ref classified,
                ref source,
            } => {
                tracing::warn!(
                    code = classified.code.as_str(),
                    reason = classified.reason,
                    retryable = classified.retryable,
                    "Billing platform error: {}",
                    source
                );
            }
            ApiError::Internal(ref e) => {
                tracing::error!("Internal error: {:?}", e);
            }
            _ => {}
        }

        let body = ErrorResponse::new(
            self.code().as_str(),
            self.public_message(),
            self.details()
                .and_then(|details| serde_json::to_value(details).ok()),
        );

        (self.status(), Json(body)).into_response()
    }
}

// Helper type for results
pub type Result<T> = std::result::Result<T, ApiError>;
