use crate::{
    config::Config,
    services::{
        BillingPlatform, DbEntitlementStore, EntitlementStore, JWTService, PlayBillingService,
        ProductCatalog, ValidationService,
    },
};
use migration::MigratorTrait;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub jwt_service: Arc<JWTService>,
    pub validation_service: Arc<ValidationService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        // Connect to database
        let db = sea_orm::Database::connect(&config.database.url).await?;

        if config.database.run_migrations {
            migration::Migrator::up(&db, None).await?;
            tracing::info!("Applied pending migrations");
        }

        let platform: Arc<dyn BillingPlatform> = Arc::new(PlayBillingService::new(&config.play)?);
        let entitlements: Arc<dyn EntitlementStore> = Arc::new(DbEntitlementStore::new(db));

        Ok(Self::from_parts(config, platform, entitlements))
    }

    /// Wire services around explicit platform and storage implementations
    pub fn from_parts(
        config: Config,
        platform: Arc<dyn BillingPlatform>,
        entitlements: Arc<dyn EntitlementStore>,
    ) -> Self {
        let catalog = Arc::new(ProductCatalog::new(&config.catalog));
        let jwt_service = Arc::new(JWTService::new(Arc::new(config.auth.clone())));
        let validation_service = Arc::new(ValidationService::new(
            catalog,
            platform,
            entitlements,
        ));

        Self {
            jwt_service,
            validation_service,
            config: Arc::new(config),
        }
    }
}
