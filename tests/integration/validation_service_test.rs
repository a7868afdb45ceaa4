use entitlement_engine::{
    error::ApiError,
    models::validation::ErrorCode,
    services::{
        play_billing_service::{ProductPurchase, SubscriptionLineItem, SubscriptionPurchase},
        ProductCatalog, ValidationService,
    },
};
use std::sync::Arc;

use super::support::{http_error, test_config, FakePlatform, MemoryEntitlementStore};

fn service() -> (
    ValidationService,
    Arc<FakePlatform>,
    Arc<MemoryEntitlementStore>,
) {
    let platform = FakePlatform::new();
    let store = MemoryEntitlementStore::new();
    let catalog = Arc::new(ProductCatalog::new(&test_config().catalog));
    (
        ValidationService::new(catalog, platform.clone(), store.clone()),
        platform,
        store,
    )
}

fn reason(err: &ApiError) -> Option<String> {
    err.details().and_then(|details| details.reason)
}

#[tokio::test]
async fn missing_user_is_unauthenticated() {
    let (service, platform, _) = service();

    let err = service
        .validate_purchase(None, "tok", "premium_monthly")
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::Unauthenticated);
    assert_eq!(platform.lookups(), 0);
}

#[tokio::test]
async fn empty_fields_are_invalid_argument() {
    let (service, platform, _) = service();

    let err = service
        .validate_purchase(Some("user-1"), "", "premium_monthly")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = service
        .validate_purchase(Some("user-1"), "tok", "")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(platform.lookups(), 0);
}

#[tokio::test]
async fn unknown_product_is_rejected_before_platform_call() {
    let (service, platform, _) = service();

    let err = service
        .validate_purchase(Some("user-1"), "tok", "premium_weekly")
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(reason(&err).as_deref(), Some("UNKNOWN_PRODUCT"));
    assert_eq!(platform.lookups(), 0);
}

#[tokio::test]
async fn path_like_token_is_rejected_before_platform_call() {
    let (service, platform, store) = service();

    for token in ["../../../../inappproducts", "tok/../x", "tok:acknowledge", "tok?alt=json"] {
        let err = service
            .validate_purchase(Some("user-1"), token, "premium_lifetime")
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::InvalidArgument, "token {}", token);
        assert_eq!(reason(&err).as_deref(), Some("INVALID_ARGUMENT"));
    }

    assert_eq!(platform.lookups(), 0);
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn platform_statuses_are_classified() {
    let cases = [
        (403, ErrorCode::FailedPrecondition, "PLAY_API_PERMISSION", false),
        (404, ErrorCode::FailedPrecondition, "PURCHASE_NOT_FOUND_OR_EXPIRED", false),
        (503, ErrorCode::Unavailable, "PLAY_TEMPORARY_FAILURE", true),
        (429, ErrorCode::Internal, "PURCHASE_VALIDATION_FAILED", false),
    ];

    for (status, code, expected_reason, retryable) in cases {
        let (service, platform, store) = service();
        platform.push_product(Err(http_error(status)));

        let err = service
            .validate_purchase(Some("user-1"), "tok", "premium_lifetime")
            .await
            .unwrap_err();

        assert_eq!(err.code(), code, "status {}", status);
        let details = err.details().unwrap();
        assert_eq!(details.reason.as_deref(), Some(expected_reason));
        assert_eq!(details.retryable, retryable);
        assert_eq!(store.writes(), 0);
    }
}

#[tokio::test]
async fn pending_one_time_purchase_is_not_granted() {
    let (service, platform, store) = service();
    platform.push_product(Ok(ProductPurchase {
        purchase_state: 2,
        order_id: None,
    }));

    let err = service
        .validate_purchase(Some("user-1"), "tok", "premium_lifetime")
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(reason(&err).as_deref(), Some("INVALID_PURCHASE_STATE"));
    assert!(!err.details().unwrap().retryable);
    assert!(store.record("user-1").is_none());
}

#[tokio::test]
async fn subscription_is_acknowledged_with_line_item_id() {
    let (service, platform, store) = service();
    platform.push_subscription(Ok(SubscriptionPurchase {
        subscription_state: Some("SUBSCRIPTION_STATE_ACTIVE".to_string()),
        acknowledgement_state: Some("ACKNOWLEDGEMENT_STATE_PENDING".to_string()),
        latest_order_id: Some("GPA.7777".to_string()),
        line_items: vec![SubscriptionLineItem {
            product_id: Some("premium_yearly".to_string()),
        }],
    }));

    let response = service
        .validate_purchase(Some("user-1"), "tok", "premium_yearly")
        .await
        .unwrap();

    assert!(response.success && response.is_premium);
    assert_eq!(platform.acknowledged(), vec!["premium_yearly".to_string()]);

    let record = store.record("user-1").unwrap();
    assert!(record.is_premium);
    assert_eq!(record.order_id.as_deref(), Some("GPA.7777"));
    assert_eq!(record.purchase_token, "tok");
}

#[tokio::test]
async fn lapsed_subscription_is_not_granted() {
    for state in [
        Some("SUBSCRIPTION_STATE_EXPIRED"),
        Some("SUBSCRIPTION_STATE_ON_HOLD"),
        Some("SUBSCRIPTION_STATE_PENDING"),
        None,
    ] {
        let (service, platform, store) = service();
        platform.push_subscription(Ok(SubscriptionPurchase {
            subscription_state: state.map(str::to_string),
            acknowledgement_state: Some("ACKNOWLEDGEMENT_STATE_PENDING".to_string()),
            ..Default::default()
        }));

        let err = service
            .validate_purchase(Some("user-1"), "tok", "premium_yearly")
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::InvalidArgument, "state {:?}", state);
        assert_eq!(reason(&err).as_deref(), Some("INVALID_PURCHASE_STATE"));
        assert!(!err.details().unwrap().retryable);
        assert!(platform.acknowledged().is_empty());
        assert_eq!(store.writes(), 0);
    }
}

#[tokio::test]
async fn acknowledge_conflict_counts_as_success() {
    let (service, platform, store) = service();
    platform.push_acknowledge(Err(http_error(409)));

    let response = service
        .validate_purchase(Some("user-1"), "tok", "premium_monthly")
        .await
        .unwrap();

    assert!(response.is_premium);
    assert_eq!(platform.acknowledged(), vec!["premium_monthly".to_string()]);
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn acknowledge_failure_is_classified() {
    let (service, platform, store) = service();
    platform.push_acknowledge(Err(http_error(500)));

    let err = service
        .validate_purchase(Some("user-1"), "tok", "premium_monthly")
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::Unavailable);
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn acknowledged_subscription_skips_acknowledge_call() {
    let (service, platform, _) = service();
    platform.push_subscription(Ok(SubscriptionPurchase {
        subscription_state: Some("SUBSCRIPTION_STATE_IN_GRACE_PERIOD".to_string()),
        acknowledgement_state: Some("ACKNOWLEDGEMENT_STATE_ACKNOWLEDGED".to_string()),
        ..Default::default()
    }));

    service
        .validate_purchase(Some("user-1"), "tok", "premium_monthly")
        .await
        .unwrap();

    assert!(platform.acknowledged().is_empty());
}

#[tokio::test]
async fn repeated_validation_converges_on_one_record() {
    let (service, _, store) = service();

    for _ in 0..3 {
        let response = service
            .validate_purchase(Some("user-1"), "tok", "premium_lifetime")
            .await
            .unwrap();
        assert!(response.is_premium);
    }

    assert_eq!(store.writes(), 3);
    let record = store.record("user-1").unwrap();
    assert_eq!(record.product_id, "premium_lifetime");
    assert_eq!(record.purchase_token, "tok");
}

#[tokio::test]
async fn store_failure_is_retryable_unavailable() {
    let (service, _, store) = service();
    store.fail_writes(true);

    let err = service
        .validate_purchase(Some("user-1"), "tok", "premium_lifetime")
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::Unavailable);
    let details = err.details().unwrap();
    assert_eq!(details.reason.as_deref(), Some("ENTITLEMENT_STORE_UNAVAILABLE"));
    assert!(details.retryable);
}

#[tokio::test]
async fn concurrent_validations_of_one_token_all_succeed() {
    let (service, _, store) = service();
    let service = Arc::new(service);

    let attempts = (0..5).map(|_| {
        let service = service.clone();
        async move {
            service
                .validate_purchase(Some("user-1"), "tok", "premium_yearly")
                .await
        }
    });

    let results = futures::future::join_all(attempts).await;
    assert!(results.iter().all(|result| result.is_ok()));
    assert_eq!(
        store.record("user-1").unwrap().product_id,
        "premium_yearly"
    );
}
