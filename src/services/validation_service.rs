use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    error::{ApiError, Result},
    models::{
        common::PurchaseKind, entitlement::EntitlementState,
        validation::ValidatePurchaseResponse,
    },
    services::{
        entitlement_store::EntitlementStore,
        play_billing_service::BillingPlatform,
        product_catalog::ProductCatalog,
        validation_errors::is_idempotent_acknowledge_error,
    },
    utils::{is_well_formed_purchase_token, token_fingerprint},
};

/// Acknowledgement state that needs no further action
const ACK_STATE_ACKNOWLEDGED: &str = "ACKNOWLEDGED";
/// Same state as spelled by the subscriptionsv2 API
const ACK_STATE_ACKNOWLEDGED_V2: &str = "ACKNOWLEDGEMENT_STATE_ACKNOWLEDGED";

/// A subscription needs acknowledging unless the platform already reports it acknowledged
pub fn should_acknowledge_subscription(ack_state: Option<&str>) -> bool {
    !matches!(
        ack_state,
        Some(ACK_STATE_ACKNOWLEDGED) | Some(ACK_STATE_ACKNOWLEDGED_V2)
    )
}

/// Prefer the line item's product id, then the requested one
pub fn resolve_subscription_acknowledge_id<'a>(
    line_item_product_id: Option<&'a str>,
    fallback_product_id: Option<&'a str>,
) -> Option<&'a str> {
    line_item_product_id.or(fallback_product_id)
}

/// Confirms purchases with the billing platform and writes entitlement state
pub struct ValidationService {
    catalog: Arc<ProductCatalog>,
    platform: Arc<dyn BillingPlatform>,
    entitlements: Arc<dyn EntitlementStore>,
}

impl ValidationService {
    pub fn new(
        catalog: Arc<ProductCatalog>,
        platform: Arc<dyn BillingPlatform>,
        entitlements: Arc<dyn EntitlementStore>,
    ) -> Self {
        Self {
            catalog,
            platform,
            entitlements,
        }
    }

    /// Validate a purchase for the calling user and grant premium.
    ///
    /// Safe to repeat for the same token: acknowledgement conflicts are treated
    /// as success and the entitlement write is an overwrite.
    #[instrument(
        skip(self, purchase_token),
        fields(token = %token_fingerprint(purchase_token))
    )]
    pub async fn validate_purchase(
        &self,
        user_id: Option<&str>,
        purchase_token: &str,
        product_id: &str,
    ) -> Result<ValidatePurchaseResponse> {
        let user_id = user_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::Unauthenticated("Sign-in required".to_string()))?;

        if purchase_token.is_empty() || product_id.is_empty() {
            return Err(ApiError::InvalidArgument(
                "purchaseToken and productId are required".to_string(),
            ));
        }

        if !is_well_formed_purchase_token(purchase_token) {
            return Err(ApiError::InvalidArgument(
                "purchaseToken contains unsupported characters".to_string(),
            ));
        }

        if !self.catalog.is_known_product_id(product_id) {
            return Err(ApiError::UnknownProduct(product_id.to_string()));
        }

        let order_id = match self.catalog.purchase_kind_for_product_id(product_id) {
            PurchaseKind::OneTime => self.confirm_one_time(product_id, purchase_token).await?,
            PurchaseKind::Recurring => self.confirm_recurring(product_id, purchase_token).await?,
        };

        let state = EntitlementState {
            is_premium: true,
            purchase_date: time::OffsetDateTime::now_utc(),
            purchase_token: purchase_token.to_string(),
            product_id: product_id.to_string(),
            order_id,
        };
        self.entitlements.write_entitlement(user_id, &state).await?;

        info!(
            user_id = user_id,
            product_id = product_id,
            "Purchase validated, premium granted"
        );

        Ok(ValidatePurchaseResponse::premium())
    }

    /// Current entitlement for a user, if any was ever written
    pub async fn get_entitlement(&self, user_id: &str) -> Result<Option<EntitlementState>> {
        self.entitlements.get_entitlement(user_id).await
    }

    async fn confirm_one_time(
        &self,
        product_id: &str,
        purchase_token: &str,
    ) -> Result<Option<String>> {
        let purchase = self
            .platform
            .get_product_purchase(product_id, purchase_token)
            .await?;

        if !purchase.is_purchased() {
            warn!(
                purchase_state = purchase.purchase_state,
                "One-time purchase is not in purchased state"
            );
            return Err(ApiError::InvalidPurchaseState(format!(
                "Invalid purchase state: {}",
                purchase.purchase_state
            )));
        }

        Ok(purchase.order_id)
    }

    async fn confirm_recurring(
        &self,
        product_id: &str,
        purchase_token: &str,
    ) -> Result<Option<String>> {
        let purchase = self
            .platform
            .get_subscription_purchase(purchase_token)
            .await?;

        if !purchase.grants_access() {
            let state = purchase
                .subscription_state
                .as_deref()
                .unwrap_or("SUBSCRIPTION_STATE_UNSPECIFIED");
            warn!(subscription_state = state, "Subscription does not grant access");
            return Err(ApiError::InvalidPurchaseState(format!(
                "Invalid subscription state: {}",
                state
            )));
        }

        if should_acknowledge_subscription(purchase.acknowledgement_state.as_deref()) {
            let subscription_id = resolve_subscription_acknowledge_id(
                purchase.line_item_product_id(),
                Some(product_id),
            )
            .ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!(
                    "No subscription id available to acknowledge purchase"
                ))
            })?;

            self.acknowledge(subscription_id, purchase_token).await?;
        }

        Ok(purchase.latest_order_id)
    }

    async fn acknowledge(&self, subscription_id: &str, purchase_token: &str) -> Result<()> {
        match self
            .platform
            .acknowledge_subscription(subscription_id, purchase_token)
            .await
        {
            Ok(()) => {
                info!(subscription_id = subscription_id, "Acknowledged subscription");
                Ok(())
            }
            Err(e) if is_idempotent_acknowledge_error(&e) => {
                info!(
                    subscription_id = subscription_id,
                    "Subscription already acknowledged: {}", e
                );
                Ok(())
            }
            Err(e) => Err(ApiError::from(e)),
        }
    }
}
