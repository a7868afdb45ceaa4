use crate::{models::entitlement::HasProductId, services::product_catalog::ProductCatalog};

/// Pick the canonical record among several purchases held by one user.
///
/// The record whose product has the lowest catalog priority wins, so a
/// grandfathered lifetime purchase is never displaced by a subscription and a
/// yearly plan is never displaced by a monthly one. Ties keep the first record.
pub fn resolve_entitlement<'a, T, I>(catalog: &ProductCatalog, records: I) -> Option<&'a T>
where
    T: HasProductId + 'a,
    I: IntoIterator<Item = &'a T>,
{
    records
        .into_iter()
        .min_by_key(|record| catalog.priority(record.product_id()))
}
