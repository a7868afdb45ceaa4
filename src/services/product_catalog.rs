use crate::{
    config::CatalogConfig,
    models::common::{ProductPlan, PurchaseKind},
};

/// Priority of the legacy lifetime purchase (lowest value wins)
pub const PRIORITY_LEGACY: u32 = 0;
pub const PRIORITY_YEARLY: u32 = 1;
pub const PRIORITY_MONTHLY: u32 = 2;
/// Anything the catalog does not know ranks last
pub const PRIORITY_UNKNOWN: u32 = 99;

/// Static mapping between plans and platform product ids
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    legacy_product_id: String,
    monthly_product_id: String,
    yearly_product_id: String,
}

impl ProductCatalog {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            legacy_product_id: config.legacy_product_id.clone(),
            monthly_product_id: config.monthly_product_id.clone(),
            yearly_product_id: config.yearly_product_id.clone(),
        }
    }

    pub fn legacy_product_id(&self) -> &str {
        &self.legacy_product_id
    }

    pub fn product_id_for_plan(&self, plan: ProductPlan) -> &str {
        match plan {
            ProductPlan::Monthly => &self.monthly_product_id,
            ProductPlan::Yearly => &self.yearly_product_id,
        }
    }

    /// The legacy one-time id never maps to a plan
    pub fn plan_for_product_id(&self, product_id: &str) -> Option<ProductPlan> {
        ProductPlan::ALL
            .into_iter()
            .find(|plan| self.product_id_for_plan(*plan) == product_id)
    }

    pub fn purchase_kind_for_product_id(&self, product_id: &str) -> PurchaseKind {
        if product_id == self.legacy_product_id {
            PurchaseKind::OneTime
        } else {
            PurchaseKind::Recurring
        }
    }

    pub fn priority(&self, product_id: &str) -> u32 {
        if product_id == self.legacy_product_id {
            return PRIORITY_LEGACY;
        }
        match self.plan_for_product_id(product_id) {
            Some(ProductPlan::Yearly) => PRIORITY_YEARLY,
            Some(ProductPlan::Monthly) => PRIORITY_MONTHLY,
            None => PRIORITY_UNKNOWN,
        }
    }

    pub fn is_known_product_id(&self, product_id: &str) -> bool {
        product_id == self.legacy_product_id || self.plan_for_product_id(product_id).is_some()
    }
}
