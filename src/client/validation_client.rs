use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::{
    models::{
        common::ErrorResponse,
        validation::{ErrorCode, ErrorDetails, ValidatePurchaseRequest, ValidatePurchaseResponse},
    },
    services::validation_errors::ValidationCallError,
    utils::token_fingerprint,
};

/// The backend validation callable, as seen from the device
#[async_trait]
pub trait PurchaseValidator: Send + Sync {
    async fn validate(
        &self,
        purchase_token: &str,
        product_id: &str,
    ) -> Result<ValidatePurchaseResponse, ValidationCallError>;
}

/// Calls `POST /api/v1/purchases/validate` with the signed-in user's token
pub struct HttpPurchaseValidator {
    base_url: String,
    http_client: reqwest::Client,
    id_token: RwLock<Option<String>>,
}

impl HttpPurchaseValidator {
    pub fn new(base_url: impl Into<String>, request_timeout_ms: u64) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url: base_url.into(),
            http_client,
            id_token: RwLock::new(None),
        })
    }

    /// Replace the bearer token; `None` signs the caller out
    pub async fn set_id_token(&self, token: Option<String>) {
        *self.id_token.write().await = token;
    }

    fn validate_url(&self) -> String {
        format!(
            "{}/api/v1/purchases/validate",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// Fallback when the body carries no readable error code
fn code_for_status(status: u16) -> ErrorCode {
    match status {
        502..=504 => ErrorCode::Unavailable,
        401 => ErrorCode::Unauthenticated,
        400 => ErrorCode::InvalidArgument,
        _ => ErrorCode::Internal,
    }
}

/// Turn a non-2xx backend response body into a call error
pub fn error_from_response(status: u16, body: &str) -> ValidationCallError {
    let Ok(envelope) = serde_json::from_str::<ErrorResponse>(body) else {
        return ValidationCallError::new(code_for_status(status), format!("HTTP {}", status));
    };

    let code = ErrorCode::from_str(&envelope.error.code).unwrap_or_else(|| code_for_status(status));
    let details = envelope
        .error
        .details
        .and_then(|value| serde_json::from_value::<ErrorDetails>(value).ok());

    let err = ValidationCallError::new(code, envelope.error.message);
    match details {
        Some(details) => err.with_details(details),
        None => err,
    }
}

#[async_trait]
impl PurchaseValidator for HttpPurchaseValidator {
    #[instrument(skip(self, purchase_token), fields(token = %token_fingerprint(purchase_token)))]
    async fn validate(
        &self,
        purchase_token: &str,
        product_id: &str,
    ) -> Result<ValidatePurchaseResponse, ValidationCallError> {
        let Some(id_token) = self.id_token.read().await.clone() else {
            return Err(ValidationCallError::new(
                ErrorCode::Unauthenticated,
                "Sign-in required",
            ));
        };

        let request = ValidatePurchaseRequest {
            purchase_token: purchase_token.to_string(),
            product_id: product_id.to_string(),
        };

        let response = self
            .http_client
            .post(self.validate_url())
            .bearer_auth(id_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ValidationCallError::new(ErrorCode::Unavailable, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ValidationCallError::new(ErrorCode::Internal, e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), "Backend rejected validation");
        Err(error_from_response(status.as_u16(), &body))
    }
}
