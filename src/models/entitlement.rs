use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Anything that names the platform product it was bought as
pub trait HasProductId {
    fn product_id(&self) -> &str;
}

/// Durable, server-written premium record for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementState {
    pub is_premium: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub purchase_date: OffsetDateTime,
    pub purchase_token: String,
    pub product_id: String,
    pub order_id: Option<String>,
}

impl From<entity::user_entitlements::Model> for EntitlementState {
    fn from(model: entity::user_entitlements::Model) -> Self {
        Self {
            is_premium: model.is_premium,
            purchase_date: model.purchase_date,
            purchase_token: model.purchase_token,
            product_id: model.product_id,
            order_id: model.order_id,
        }
    }
}

impl HasProductId for EntitlementState {
    fn product_id(&self) -> &str {
        &self.product_id
    }
}

/// GET /api/v1/entitlement response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementResponse {
    pub success: bool,
    pub data: EntitlementData,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementData {
    pub is_premium: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub purchase_date: Option<OffsetDateTime>,
    pub product_id: Option<String>,
    pub order_id: Option<String>,
}

impl From<Option<EntitlementState>> for EntitlementData {
    fn from(state: Option<EntitlementState>) -> Self {
        match state {
            Some(state) => Self {
                is_premium: state.is_premium,
                purchase_date: Some(state.purchase_date),
                product_id: Some(state.product_id),
                order_id: state.order_id,
            },
            None => Self {
                is_premium: false,
                purchase_date: None,
                product_id: None,
                order_id: None,
            },
        }
    }
}

/// A purchase reported by the on-device billing library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePurchase {
    pub purchase_token: String,
    pub product_id: String,
}

impl HasProductId for DevicePurchase {
    fn product_id(&self) -> &str {
        &self.product_id
    }
}

/// A purchase the backend has confirmed, as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPurchase {
    pub purchase_token: String,
    pub product_id: String,
    pub validated_at: OffsetDateTime,
}

impl HasProductId for ValidatedPurchase {
    fn product_id(&self) -> &str {
        &self.product_id
    }
}
