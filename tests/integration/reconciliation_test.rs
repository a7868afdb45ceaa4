use async_trait::async_trait;
use entitlement_engine::{
    client::{
        FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, PurchaseReconciler,
        PurchaseValidator, ReconcileOutcome,
    },
    config::{ClientConfig, RetryConfig},
    models::{entitlement::DevicePurchase, validation::ValidatePurchaseResponse},
    services::{
        validation_errors::{ValidationCallError, ValidationNotice},
        ProductCatalog,
    },
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use time::macros::datetime;
use tokio::sync::{mpsc, watch, Notify};

use super::support::{http_error, test_config, RouterValidator, TestApp};

const STORAGE_KEY: &str = "pendingPurchaseValidations";

fn client_config(tick_interval_ms: u64) -> ClientConfig {
    ClientConfig {
        backend_base_url: "http://localhost".to_string(),
        catalog: test_config().catalog,
        request_timeout_ms: 1_000,
        storage_key: STORAGE_KEY.to_string(),
        retry: RetryConfig {
            tick_interval_ms,
            ..RetryConfig::default()
        },
    }
}

fn reconciler(
    validator: Arc<dyn PurchaseValidator>,
    storage: Arc<dyn KeyValueStore>,
    config: &ClientConfig,
) -> PurchaseReconciler {
    PurchaseReconciler::new(
        Arc::new(ProductCatalog::new(&config.catalog)),
        validator,
        storage,
        config,
    )
}

fn purchase(token: &str, product_id: &str) -> DevicePurchase {
    DevicePurchase {
        purchase_token: token.to_string(),
        product_id: product_id.to_string(),
    }
}

#[tokio::test]
async fn outage_then_recovery_grants_premium() {
    let app = TestApp::new();
    app.platform.push_subscription(Err(http_error(503)));

    let storage = Arc::new(MemoryKeyValueStore::new());
    let config = client_config(1_000);
    let reconciler = reconciler(
        Arc::new(RouterValidator::new(&app, "user-1")),
        storage.clone(),
        &config,
    );
    let now = datetime!(2026-03-01 12:00 UTC);

    let outcome = reconciler
        .purchase_completed(purchase("tok-1", "premium_monthly"), now)
        .await
        .unwrap();

    match &outcome {
        ReconcileOutcome::Rescheduled {
            next_retry_at,
            attempt,
            reason,
            notice,
            ..
        } => {
            assert_eq!(*next_retry_at, datetime!(2026-03-01 12:00:05 UTC));
            assert_eq!(*attempt, 1);
            assert_eq!(reason.as_deref(), Some("PLAY_TEMPORARY_FAILURE"));
            assert_eq!(*notice, ValidationNotice::TemporaryFailure);
        }
        other => panic!("expected reschedule, got {:?}", other),
    }

    let persisted: serde_json::Value =
        serde_json::from_str(&storage.get(STORAGE_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(persisted["tok-1"]["lastReason"], "PLAY_TEMPORARY_FAILURE");
    assert_eq!(persisted["tok-1"]["purchaseKind"], "recurring");
    assert!(app.store.record("user-1").is_none());

    let outcomes = reconciler
        .tick(datetime!(2026-03-01 12:00:05 UTC))
        .await;
    assert!(matches!(
        outcomes.as_slice(),
        [ReconcileOutcome::Validated { .. }]
    ));

    assert_eq!(reconciler.pending_count().await, 0);
    assert_eq!(storage.get(STORAGE_KEY).unwrap(), None);
    assert!(reconciler.is_premium().await);
    assert!(app.store.record("user-1").unwrap().is_premium);
}

#[tokio::test]
async fn fatal_backend_error_drops_entry() {
    let app = TestApp::new();
    app.platform.push_product(Err(http_error(404)));

    let storage = Arc::new(MemoryKeyValueStore::new());
    let reconciler = reconciler(
        Arc::new(RouterValidator::new(&app, "user-1")),
        storage.clone(),
        &client_config(1_000),
    );

    let outcome = reconciler
        .purchase_completed(
            purchase("tok-1", "premium_lifetime"),
            datetime!(2026-03-01 12:00 UTC),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Dropped {
            purchase_token: "tok-1".to_string(),
            reason: Some("PURCHASE_NOT_FOUND_OR_EXPIRED".to_string()),
            notice: ValidationNotice::ValidationFailed,
        }
    );
    assert_eq!(storage.get(STORAGE_KEY).unwrap(), None);
}

#[tokio::test]
async fn queue_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client-state.json");
    let app = TestApp::new();
    app.platform.push_product(Err(http_error(502)));
    let config = client_config(1_000);

    {
        let storage = Arc::new(FileKeyValueStore::open(&path).unwrap());
        let first = reconciler(
            Arc::new(RouterValidator::new(&app, "user-1")),
            storage,
            &config,
        );
        first
            .purchase_completed(
                purchase("tok-1", "premium_lifetime"),
                datetime!(2026-03-01 12:00 UTC),
            )
            .await
            .unwrap();
    }

    let storage = Arc::new(FileKeyValueStore::open(&path).unwrap());
    let second = reconciler(
        Arc::new(RouterValidator::new(&app, "user-1")),
        storage,
        &config,
    );
    assert_eq!(
        second.start(datetime!(2026-03-01 12:01 UTC)).await.unwrap(),
        1
    );

    let outcomes = second.tick(datetime!(2026-03-01 12:01 UTC)).await;
    assert_eq!(outcomes.len(), 1);
    assert!(second.is_premium().await);
}

/// Blocks every call until released, counting how many were started
struct GatedValidator {
    started: AtomicUsize,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl PurchaseValidator for GatedValidator {
    async fn validate(
        &self,
        _purchase_token: &str,
        _product_id: &str,
    ) -> Result<ValidatePurchaseResponse, ValidationCallError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ValidatePurchaseResponse::premium())
    }
}

#[tokio::test]
async fn second_attempt_while_in_flight_is_skipped() {
    let validator = Arc::new(GatedValidator {
        started: AtomicUsize::new(0),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let reconciler = Arc::new(reconciler(
        validator.clone(),
        Arc::new(MemoryKeyValueStore::new()),
        &client_config(1_000),
    ));
    let now = datetime!(2026-03-01 12:00 UTC);

    let first = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            reconciler
                .purchase_completed(purchase("tok-1", "premium_yearly"), now)
                .await
        })
    };
    validator.entered.notified().await;

    let second = reconciler
        .purchase_completed(purchase("tok-1", "premium_yearly"), now)
        .await
        .unwrap();
    assert_eq!(
        second,
        ReconcileOutcome::InFlight {
            purchase_token: "tok-1".to_string()
        }
    );

    validator.release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, ReconcileOutcome::Validated { .. }));
    assert_eq!(validator.started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn run_loop_reports_outcomes_until_shutdown() {
    let storage = Arc::new(MemoryKeyValueStore::new());
    storage
        .set(
            STORAGE_KEY,
            &serde_json::json!({
                "tok-1": {
                    "productId": "premium_monthly",
                    "purchaseKind": "recurring",
                    "createdAt": "2026-03-01T12:00:00Z",
                    "nextRetryAt": "2026-03-01T12:00:00Z"
                }
            })
            .to_string(),
        )
        .unwrap();

    let app = TestApp::new();
    let reconciler = Arc::new(reconciler(
        Arc::new(RouterValidator::new(&app, "user-1")),
        storage,
        &client_config(10),
    ));
    reconciler
        .start(datetime!(2026-03-01 12:00 UTC))
        .await
        .unwrap();

    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(reconciler.clone().run(outcome_tx, shutdown_rx));

    let outcome = tokio::time::timeout(Duration::from_secs(5), outcome_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Validated { .. }));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(app.store.record("user-1").unwrap().is_premium);
}
