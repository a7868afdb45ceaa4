//! `SeaORM` entity prelude

pub use super::user_entitlements::Entity as UserEntitlements;
