// Service modules
pub mod entitlement_resolver;
pub mod entitlement_store;
pub mod jwt_service;
pub mod play_billing_service;
pub mod product_catalog;
pub mod validation_errors;
pub mod validation_service;

pub use entitlement_resolver::resolve_entitlement;
pub use entitlement_store::{DbEntitlementStore, EntitlementStore};
pub use jwt_service::JWTService;
pub use play_billing_service::{BillingPlatform, PlayBillingService};
pub use product_catalog::ProductCatalog;
pub use validation_service::ValidationService;
