use axum::{body::Body, http::Request, http::StatusCode};
use serde_json::json;

use super::support::{http_error, TestApp};

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::new();
    let (status, body) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_bearer_is_unauthenticated() {
    let app = TestApp::new();
    let request = Request::post("/api/v1/purchases/validate")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "purchaseToken": "tok", "productId": "premium_monthly" }).to_string(),
        ))
        .unwrap();

    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "unauthenticated");
    assert_eq!(app.platform.lookups(), 0);
}

#[tokio::test]
async fn validate_grants_premium_and_entitlement_reads_back() {
    let app = TestApp::new();

    let (status, body) = app
        .send(app.validate_request(
            "user-1",
            json!({ "purchaseToken": "tok-1", "productId": "premium_lifetime" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "isPremium": true }));

    let request = Request::get("/api/v1/entitlement")
        .header("authorization", app.bearer("user-1"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isPremium"], true);
    assert_eq!(body["data"]["productId"], "premium_lifetime");
    assert_eq!(body["data"]["orderId"], "GPA.0000-0001");
}

#[tokio::test]
async fn entitlement_for_new_user_is_not_premium() {
    let app = TestApp::new();
    let request = Request::get("/api/v1/entitlement")
        .header("authorization", app.bearer("nobody"))
        .body(Body::empty())
        .unwrap();

    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isPremium"], false);
    assert!(body["data"]["productId"].is_null());
}

#[tokio::test]
async fn missing_field_is_invalid_argument() {
    let app = TestApp::new();

    let (status, body) = app
        .send(app.validate_request("user-1", json!({ "productId": "premium_monthly" })))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid-argument");
    assert_eq!(body["error"]["details"]["reason"], "INVALID_ARGUMENT");
    assert_eq!(body["error"]["details"]["retryable"], false);
    assert_eq!(app.platform.lookups(), 0);
}

#[tokio::test]
async fn traversal_token_never_reaches_play() {
    let app = TestApp::new();

    let (status, body) = app
        .send(app.validate_request(
            "user-1",
            json!({
                "purchaseToken": "../../../../inappproducts",
                "productId": "premium_lifetime"
            }),
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid-argument");
    assert_eq!(app.platform.lookups(), 0);
    assert!(app.store.record("user-1").is_none());
}

#[tokio::test]
async fn malformed_json_is_invalid_argument() {
    let app = TestApp::new();
    let request = Request::post("/api/v1/purchases/validate")
        .header("authorization", app.bearer("user-1"))
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid-argument");
}

#[tokio::test]
async fn platform_outage_is_retryable_unavailable() {
    let app = TestApp::new();
    app.platform.push_subscription(Err(http_error(503)));

    let (status, body) = app
        .send(app.validate_request(
            "user-1",
            json!({ "purchaseToken": "tok-1", "productId": "premium_yearly" }),
        ))
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body["error"]["details"],
        json!({ "reason": "PLAY_TEMPORARY_FAILURE", "retryable": true, "statusCode": 503 })
    );
    assert_eq!(body["error"]["code"], "unavailable");
    assert!(app.store.record("user-1").is_none());
}

#[tokio::test]
async fn missing_purchase_is_failed_precondition() {
    let app = TestApp::new();
    app.platform.push_product(Err(http_error(404)));

    let (status, body) = app
        .send(app.validate_request(
            "user-1",
            json!({ "purchaseToken": "tok-1", "productId": "premium_lifetime" }),
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "failed-precondition");
    assert_eq!(body["error"]["details"]["reason"], "PURCHASE_NOT_FOUND_OR_EXPIRED");
}
