use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::{config::PlayConfig, services::validation_errors::PlatformError, utils::token_fingerprint};

/// OAuth scope for the Google Play Developer API
const ANDROIDPUBLISHER_SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";
/// JWT-bearer grant used by service accounts
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Lifetime requested for the signed assertion
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh cached access tokens this long before they expire
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// One-time product purchase as returned by `purchases.products.get`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPurchase {
    /// 0 = purchased, 1 = canceled, 2 = pending; a body without it is not a purchase
    pub purchase_state: i32,
    #[serde(default)]
    pub order_id: Option<String>,
}

impl ProductPurchase {
    pub fn is_purchased(&self) -> bool {
        self.purchase_state == 0
    }
}

/// States in which a subscription still grants access
const ENTITLING_SUBSCRIPTION_STATES: [&str; 3] = [
    "SUBSCRIPTION_STATE_ACTIVE",
    "SUBSCRIPTION_STATE_IN_GRACE_PERIOD",
    // Canceled subscriptions run until the end of the paid period
    "SUBSCRIPTION_STATE_CANCELED",
];

/// Subscription purchase as returned by `purchases.subscriptionsv2.get`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPurchase {
    #[serde(default)]
    pub subscription_state: Option<String>,
    #[serde(default)]
    pub acknowledgement_state: Option<String>,
    #[serde(default)]
    pub latest_order_id: Option<String>,
    #[serde(default)]
    pub line_items: Vec<SubscriptionLineItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionLineItem {
    #[serde(default)]
    pub product_id: Option<String>,
}

impl SubscriptionPurchase {
    /// Expired, pending, paused, on-hold or missing states do not grant premium
    pub fn grants_access(&self) -> bool {
        self.subscription_state
            .as_deref()
            .is_some_and(|state| ENTITLING_SUBSCRIPTION_STATES.contains(&state))
    }

    pub fn line_item_product_id(&self) -> Option<&str> {
        self.line_items
            .iter()
            .find_map(|item| item.product_id.as_deref())
    }
}

/// Read and acknowledge operations the validation service needs from the billing platform
#[async_trait]
pub trait BillingPlatform: Send + Sync {
    async fn get_product_purchase(
        &self,
        product_id: &str,
        purchase_token: &str,
    ) -> Result<ProductPurchase, PlatformError>;

    async fn get_subscription_purchase(
        &self,
        purchase_token: &str,
    ) -> Result<SubscriptionPurchase, PlatformError>;

    async fn acknowledge_subscription(
        &self,
        subscription_id: &str,
        purchase_token: &str,
    ) -> Result<(), PlatformError>;
}

/// Subset of a Google service account JSON key
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    message: String,
}

/// Cached OAuth access token with expiry
struct CachedAccessToken {
    token: String,
    expires_at: OffsetDateTime,
}

struct ServiceAccountCredentials {
    client_email: String,
    token_uri: String,
    signing_key: EncodingKey,
}

/// Google Play Developer API client
pub struct PlayBillingService {
    config: PlayConfig,
    api_base: reqwest::Url,
    http_client: reqwest::Client,
    credentials: Option<ServiceAccountCredentials>,
    access_token_cache: Arc<RwLock<Option<CachedAccessToken>>>,
}

impl PlayBillingService {
    pub fn new(config: &PlayConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        let credentials = match config.service_account_key_path.as_deref() {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let key: ServiceAccountKey = serde_json::from_str(&raw)?;
                let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
                info!("Loaded Play service account {}", key.client_email);
                Some(ServiceAccountCredentials {
                    client_email: key.client_email,
                    token_uri: key.token_uri.unwrap_or_else(|| config.token_uri.clone()),
                    signing_key,
                })
            }
            None => None,
        };

        let api_base = reqwest::Url::parse(&config.api_base)?;
        if api_base.cannot_be_a_base() {
            anyhow::bail!("Play API base {} cannot carry a path", config.api_base);
        }

        Ok(Self {
            config: config.clone(),
            api_base,
            http_client,
            credentials,
            access_token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// `{api_base}/androidpublisher/v3/applications/{package}/purchases/{tail...}`.
    ///
    /// Every segment is pushed separately so a token can never leave its own segment.
    fn purchases_url(&self, tail: &[&str]) -> Result<reqwest::Url, PlatformError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| PlatformError::Transport("Play API base cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend([
                "androidpublisher",
                "v3",
                "applications",
                self.config.package_name.as_str(),
                "purchases",
            ])
            .extend(tail);
        Ok(url)
    }

    /// Get a valid OAuth access token, exchanging a fresh assertion when the cache is stale
    async fn access_token(&self) -> Result<Option<String>, PlatformError> {
        let Some(credentials) = self.credentials.as_ref() else {
            return Ok(None);
        };

        let now = OffsetDateTime::now_utc();
        {
            let cache = self.access_token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at - time::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now {
                    return Ok(Some(cached.token.clone()));
                }
            }
        }

        let iat = now.unix_timestamp();
        let claims = AssertionClaims {
            iss: &credentials.client_email,
            scope: ANDROIDPUBLISHER_SCOPE,
            aud: &credentials.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let assertion = encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &credentials.signing_key,
        )
        .map_err(|e| PlatformError::Credentials(format!("Failed to sign assertion: {}", e)))?;

        let response = self
            .http_client
            .post(&credentials.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| PlatformError::Credentials(format!("Token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PlatformError::Credentials(format!(
                "Token exchange rejected ({}): {}",
                status, error_text
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Credentials(format!("Invalid token response: {}", e)))?;

        debug!("Refreshed Play access token, expires in {}s", token.expires_in);

        let mut cache = self.access_token_cache.write().await;
        *cache = Some(CachedAccessToken {
            token: token.access_token.clone(),
            expires_at: now + time::Duration::seconds(token.expires_in),
        });

        Ok(Some(token.access_token))
    }

    /// Send a request, turning transport failures and non-2xx statuses into `PlatformError`
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PlatformError> {
        let request = match self.access_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GoogleErrorBody>(&error_text)
            .map(|body| body.error.message)
            .unwrap_or(error_text);

        Err(PlatformError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl BillingPlatform for PlayBillingService {
    #[instrument(skip(self, purchase_token), fields(token = %token_fingerprint(purchase_token)))]
    async fn get_product_purchase(
        &self,
        product_id: &str,
        purchase_token: &str,
    ) -> Result<ProductPurchase, PlatformError> {
        let url = self.purchases_url(&["products", product_id, "tokens", purchase_token])?;

        self.send(self.http_client.get(url))
            .await?
            .json()
            .await
            .map_err(|e| PlatformError::InvalidResponse(e.to_string()))
    }

    #[instrument(skip(self, purchase_token), fields(token = %token_fingerprint(purchase_token)))]
    async fn get_subscription_purchase(
        &self,
        purchase_token: &str,
    ) -> Result<SubscriptionPurchase, PlatformError> {
        let url = self.purchases_url(&["subscriptionsv2", "tokens", purchase_token])?;

        self.send(self.http_client.get(url))
            .await?
            .json()
            .await
            .map_err(|e| PlatformError::InvalidResponse(e.to_string()))
    }

    #[instrument(skip(self, purchase_token), fields(token = %token_fingerprint(purchase_token)))]
    async fn acknowledge_subscription(
        &self,
        subscription_id: &str,
        purchase_token: &str,
    ) -> Result<(), PlatformError> {
        let action = format!("{}:acknowledge", purchase_token);
        let url = self.purchases_url(&["subscriptions", subscription_id, "tokens", &action])?;

        self.send(self.http_client.post(url).json(&serde_json::json!({})))
            .await?;

        Ok(())
    }
}
