use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per user; validation overwrites it in place
        manager
            .create_table(
                Table::create()
                    .table(UserEntitlements::Table)
                    .if_not_exists()
                    .col(string(UserEntitlements::UserId).primary_key())
                    .col(boolean(UserEntitlements::IsPremium).default(false).not_null())
                    .col(timestamp_with_time_zone(UserEntitlements::PurchaseDate).not_null())
                    .col(string(UserEntitlements::PurchaseToken).not_null())
                    .col(string(UserEntitlements::ProductId).not_null())
                    .col(string_null(UserEntitlements::OrderId))
                    .col(
                        timestamp_with_time_zone(UserEntitlements::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Support lookups by purchase token (support tooling, duplicate detection)
        manager
            .create_index(
                Index::create()
                    .name("idx_user_entitlements_purchase_token")
                    .table(UserEntitlements::Table)
                    .col(UserEntitlements::PurchaseToken)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserEntitlements::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserEntitlements {
    Table,
    UserId,
    IsPremium,
    PurchaseDate,
    PurchaseToken,
    ProductId,
    OrderId,
    UpdatedAt,
}
