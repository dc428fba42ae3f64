//! Bearer token authentication.
//!
//! Tokens are read from `Authorization: Bearer <token>` or, for WebSocket
//! clients that cannot set headers, from `?token=<token>`.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

use crate::HttpState;

fn extract_bearer_token<B>(req: &axum::http::Request<B>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// `/ws/events?foo=bar&token=abc` -> `Some("abc")`
fn extract_query_token<B>(req: &axum::http::Request<B>) -> Option<&str> {
    req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "token").then_some(value)
        })
    })
}

/// Reject requests that do not carry the configured token.
pub async fn auth_middleware(State(state): State<Arc<HttpState>>, req: Request, next: Next) -> Response {
    if state.auth_token.is_none() {
        return next.run(req).await;
    }

    let token = extract_bearer_token(&req).or_else(|| extract_query_token(&req));
    if state.validate_token(token) {
        next.run(req).await
    } else {
        log::debug!("Rejected unauthenticated request to {}", req.uri().path());
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid or missing authentication token" })),
        )
            .into_response()
    }
}

// ============================================================================
// TESTS
// ============================================================================
