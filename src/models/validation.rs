use serde::{Deserialize, Serialize};
use validator::Validate;

/// Callable error codes shared by the backend and the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidArgument,
    Unauthenticated,
    FailedPrecondition,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "invalid-argument" => Some(Self::InvalidArgument),
            "unauthenticated" => Some(Self::Unauthenticated),
            "failed-precondition" => Some(Self::FailedPrecondition),
            "unavailable" => Some(Self::Unavailable),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid-argument",
            Self::Unauthenticated => "unauthenticated",
            Self::FailedPrecondition => "failed-precondition",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

/// Classifier verdict: why a validation failed and whether to try again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationErrorDetails {
    pub reason: Option<String>,
    pub retryable: bool,
}

/// `details` object carried by backend error responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

/// POST /api/v1/purchases/validate request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePurchaseRequest {
    // Missing fields deserialize as empty and are rejected by validation
    #[serde(default)]
    #[validate(length(min = 1, max = 4096))]
    pub purchase_token: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 255))]
    pub product_id: String,
}

/// POST /api/v1/purchases/validate response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePurchaseResponse {
    pub success: bool,
    pub is_premium: bool,
}

impl ValidatePurchaseResponse {
    pub fn premium() -> Self {
        Self {
            success: true,
            is_premium: true,
        }
    }
}
