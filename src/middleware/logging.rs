use axum::{
    body::{to_bytes, Body, Bytes},
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;

use crate::utils::redact_purchase_tokens;

/// Largest body read into memory for logging
const MAX_LOGGED_BODY_BYTES: usize = 1024 * 1024;
/// Characters of a body kept in one log line
const MAX_LOGGED_BODY_CHARS: usize = 2000;

/// Log each callable request and its response with purchase tokens fingerprinted.
///
/// The per-request id is echoed back as `x-request-id`.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_LOGGED_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, "Rejected unreadable request body: {}", e);
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        body = %loggable(&bytes),
        "→ Request"
    );

    let response = next
        .run(Request::from_parts(parts, Body::from(bytes)))
        .await;

    let status = response.status();
    let (mut parts, body) = response.into_parts();
    let bytes = to_bytes(body, MAX_LOGGED_BODY_BYTES)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(request_id = %request_id, "Failed to read response body: {}", e);
            Bytes::new()
        });

    let latency_ms = start.elapsed().as_millis() as u64;
    if status.is_server_error() {
        tracing::warn!(
            request_id = %request_id,
            uri = %uri,
            status = status.as_u16(),
            latency_ms = latency_ms,
            body = %loggable(&bytes),
            "← Response"
        );
    } else {
        tracing::info!(
            request_id = %request_id,
            uri = %uri,
            status = status.as_u16(),
            latency_ms = latency_ms,
            body = %loggable(&bytes),
            "← Response"
        );
    }

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        parts.headers.insert("x-request-id", value);
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Redacted, trimmed body text for one log field
fn loggable(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "-".to_string();
    }
    truncate_body(&redacted_body(bytes), MAX_LOGGED_BODY_CHARS)
}

/// Render a body for logging; JSON bodies have purchase tokens replaced
fn redacted_body(bytes: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(mut value) => {
            redact_purchase_tokens(&mut value);
            value.to_string()
        }
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn truncate_body(body: &str, max_len: usize) -> String {
    let body = body.trim();
    if body.len() <= max_len {
        body.to_string()
    } else {
        format!(
            "{}… ({} bytes)",
            &body[..floor_char_boundary(body, max_len)],
            body.len()
        )
    }
}

/// Largest char boundary at or below `index`
fn floor_char_boundary(s: &str, index: usize) -> usize {
    (0..=index.min(s.len()))
        .rev()
        .find(|i| s.is_char_boundary(*i))
        .unwrap_or(0)
}
