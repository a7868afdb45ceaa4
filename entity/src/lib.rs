//! `SeaORM` entities

pub mod prelude;

pub mod user_entitlements;
