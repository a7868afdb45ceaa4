use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use tracing::instrument;
use validator::Validate;

use crate::{
    app_state::AppState,
    error::{ApiError, Result},
    middleware::UserIdentity,
    models::{
        entitlement::{EntitlementData, EntitlementResponse},
        validation::{ValidatePurchaseRequest, ValidatePurchaseResponse},
    },
};

/// POST /api/v1/purchases/validate
#[instrument(skip(state, payload))]
pub async fn validate_purchase(
    State(state): State<AppState>,
    identity: UserIdentity,
    payload: std::result::Result<Json<ValidatePurchaseRequest>, JsonRejection>,
) -> Result<Json<ValidatePurchaseResponse>> {
    // Malformed bodies get the same invalid-argument envelope as failed validation
    let Json(request) =
        payload.map_err(|e| ApiError::InvalidArgument(format!("Invalid request body: {}", e)))?;

    request
        .validate()
        .map_err(|e| ApiError::InvalidArgument(format!("Validation error: {}", e)))?;

    let response = state
        .validation_service
        .validate_purchase(
            Some(identity.user_id.as_str()),
            &request.purchase_token,
            &request.product_id,
        )
        .await?;

    Ok(Json(response))
}

/// GET /api/v1/entitlement
#[instrument(skip(state))]
pub async fn get_entitlement(
    State(state): State<AppState>,
    identity: UserIdentity,
) -> Result<Json<EntitlementResponse>> {
    let entitlement = state
        .validation_service
        .get_entitlement(&identity.user_id)
        .await?;

    Ok(Json(EntitlementResponse {
        success: true,
        data: EntitlementData::from(entitlement),
    }))
}
