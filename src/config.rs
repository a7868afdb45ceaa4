use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub play: PlayConfig,
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default)]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_expiration_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayConfig {
    pub package_name: String,
    #[serde(default = "default_play_api_base")]
    pub api_base: String,
    #[serde(default = "default_google_token_uri")]
    pub token_uri: String,
    /// Service account JSON key; requests go out unauthenticated when absent
    #[serde(default)]
    pub service_account_key_path: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Platform product identifiers for the plans and the legacy lifetime item
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub legacy_product_id: String,
    pub monthly_product_id: String,
    pub yearly_product_id: String,
}

/// Client-side (on-device) settings for the pending-validation queue
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub backend_base_url: String,
    pub catalog: CatalogConfig,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts_per_session")]
    pub max_attempts_per_session: u32,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts_per_session: default_max_attempts_per_session(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_play_api_base() -> String {
    "https://androidpublisher.googleapis.com".to_string()
}

fn default_google_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_storage_key() -> String {
    "pendingPurchaseValidations".to_string()
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_max_attempts_per_session() -> u32 {
    5
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for environment variable overrides)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(
                config::Environment::with_prefix("ENTITLEMENT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl ClientConfig {
    /// Load client settings from `client.yml` (optional) and `ENTITLEMENT_CLIENT__*`
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("client").required(false))
            .add_source(
                config::Environment::with_prefix("ENTITLEMENT_CLIENT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
