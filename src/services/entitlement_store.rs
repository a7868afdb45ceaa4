use async_trait::async_trait;
use sea_orm::{entity::*, sea_query::OnConflict, DatabaseConnection};
use tracing::{info, instrument};

use crate::{error::Result, models::entitlement::EntitlementState};

/// Durable per-user entitlement record
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Overwrite the user's entitlement (last write wins)
    async fn write_entitlement(&self, user_id: &str, state: &EntitlementState) -> Result<()>;

    async fn get_entitlement(&self, user_id: &str) -> Result<Option<EntitlementState>>;
}

pub struct DbEntitlementStore {
    db: DatabaseConnection,
}

impl DbEntitlementStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EntitlementStore for DbEntitlementStore {
    #[instrument(skip(self, state))]
    async fn write_entitlement(&self, user_id: &str, state: &EntitlementState) -> Result<()> {
        let now = time::OffsetDateTime::now_utc();

        let record = entity::user_entitlements::ActiveModel {
            user_id: Set(user_id.to_string()),
            is_premium: Set(state.is_premium),
            purchase_date: Set(state.purchase_date),
            purchase_token: Set(state.purchase_token.clone()),
            product_id: Set(state.product_id.clone()),
            order_id: Set(state.order_id.clone()),
            updated_at: Set(now),
        };

        // Upsert on user_id; repeated validations of the same token converge on one row
        entity::user_entitlements::Entity::insert(record)
            .on_conflict(
                OnConflict::column(entity::user_entitlements::Column::UserId)
                    .update_columns([
                        entity::user_entitlements::Column::IsPremium,
                        entity::user_entitlements::Column::PurchaseDate,
                        entity::user_entitlements::Column::PurchaseToken,
                        entity::user_entitlements::Column::ProductId,
                        entity::user_entitlements::Column::OrderId,
                        entity::user_entitlements::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        info!(
            user_id = user_id,
            product_id = %state.product_id,
            "Wrote premium entitlement"
        );

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_entitlement(&self, user_id: &str) -> Result<Option<EntitlementState>> {
        let record = entity::user_entitlements::Entity::find_by_id(user_id.to_string())
            .one(&self.db)
            .await?;

        Ok(record.map(EntitlementState::from))
    }
}
