//! Failure classification shared by the backend and the on-device client.
//!
//! Classification happens exactly once, at the boundary nearest the failure:
//! the backend classifies billing-platform failures into a [`ClassifiedError`],
//! the client classifies failed backend calls into [`ValidationErrorDetails`].

use crate::models::validation::{ErrorCode, ErrorDetails, ValidationErrorDetails};

pub const REASON_PLAY_API_PERMISSION: &str = "PLAY_API_PERMISSION";
pub const REASON_PURCHASE_NOT_FOUND_OR_EXPIRED: &str = "PURCHASE_NOT_FOUND_OR_EXPIRED";
pub const REASON_PLAY_TEMPORARY_FAILURE: &str = "PLAY_TEMPORARY_FAILURE";
pub const REASON_PURCHASE_VALIDATION_FAILED: &str = "PURCHASE_VALIDATION_FAILED";
pub const REASON_INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
pub const REASON_INVALID_PURCHASE_STATE: &str = "INVALID_PURCHASE_STATE";
pub const REASON_UNKNOWN_PRODUCT: &str = "UNKNOWN_PRODUCT";
pub const REASON_ENTITLEMENT_STORE_UNAVAILABLE: &str = "ENTITLEMENT_STORE_UNAVAILABLE";

/// Failure talking to the billing platform
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("credentials error: {0}")]
    Credentials(String),
}

impl PlatformError {
    pub fn status(&self) -> Option<u16> {
        match self {
            PlatformError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Server-side verdict for a billing-platform failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub code: ErrorCode,
    pub reason: &'static str,
    pub retryable: bool,
    pub status_code: Option<u16>,
}

impl ClassifiedError {
    pub fn message(&self) -> &'static str {
        match self.reason {
            REASON_PLAY_API_PERMISSION => "Billing platform rejected the server credentials",
            REASON_PURCHASE_NOT_FOUND_OR_EXPIRED => "Purchase not found or expired",
            REASON_PLAY_TEMPORARY_FAILURE => "Billing platform temporarily unavailable",
            _ => "Purchase validation failed",
        }
    }
}

/// Map a billing-platform failure onto the fixed error taxonomy
pub fn classify_server_error(err: &PlatformError) -> ClassifiedError {
    let status_code = err.status();
    let (code, reason, retryable) = match status_code {
        Some(403) => (ErrorCode::FailedPrecondition, REASON_PLAY_API_PERMISSION, false),
        Some(404) => (
            ErrorCode::FailedPrecondition,
            REASON_PURCHASE_NOT_FOUND_OR_EXPIRED,
            false,
        ),
        Some(500..=599) => (ErrorCode::Unavailable, REASON_PLAY_TEMPORARY_FAILURE, true),
        _ => (ErrorCode::Internal, REASON_PURCHASE_VALIDATION_FAILED, false),
    };

    ClassifiedError {
        code,
        reason,
        retryable,
        status_code,
    }
}

/// True when an acknowledge failure only means the purchase is already acknowledged
pub fn is_idempotent_acknowledge_error(err: &PlatformError) -> bool {
    match err {
        PlatformError::Http { status: 409, .. } => true,
        PlatformError::Http { message, .. }
        | PlatformError::Transport(message)
        | PlatformError::InvalidResponse(message) => {
            message.to_lowercase().contains("already acknowledged")
        }
        PlatformError::Credentials(_) => false,
    }
}

/// Failed call from the client to the backend validation endpoint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {}", .code.as_str(), .message)]
pub struct ValidationCallError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<ErrorDetails>,
}

impl ValidationCallError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }
}

/// Client-side verdict for a failed backend call
pub fn classify_client_error(err: &ValidationCallError) -> ValidationErrorDetails {
    let reason = err.details.as_ref().and_then(|d| d.reason.clone());

    if err.details.as_ref().is_some_and(|d| d.retryable) {
        return ValidationErrorDetails {
            reason: reason.or_else(|| Some(err.code.as_str().to_string())),
            retryable: true,
        };
    }

    ValidationErrorDetails {
        reason,
        retryable: err.code == ErrorCode::Unavailable,
    }
}

/// User-facing notice picked from a classifier verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationNotice {
    TemporaryFailure,
    ValidationFailed,
    PendingVerification,
    RetriesExhausted,
}

impl ValidationNotice {
    pub fn for_details(details: &ValidationErrorDetails) -> Self {
        if details.retryable {
            ValidationNotice::TemporaryFailure
        } else if details.reason.is_some() {
            ValidationNotice::ValidationFailed
        } else {
            ValidationNotice::PendingVerification
        }
    }

    pub fn message_key(&self) -> &'static str {
        match self {
            ValidationNotice::TemporaryFailure => "purchase.validation.temporary_failure",
            ValidationNotice::ValidationFailed => "purchase.validation.failed",
            ValidationNotice::PendingVerification => "purchase.validation.pending",
            ValidationNotice::RetriesExhausted => "purchase.validation.retries_exhausted",
        }
    }

    /// Whether the purchase leaves the queue when this notice is shown
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ValidationNotice::TemporaryFailure)
    }
}
