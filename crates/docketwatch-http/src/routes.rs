//! REST handlers for sessions, portal operations and the daemon.
//!
//! Handlers are thin: they decode the request, call into [`DocketContext`]
//! and shape the result. Every failure leaves as `{"error": ...}`.
//!
//! [`DocketContext`]: docketwatch_core::DocketContext

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use docketwatch_core::automation::Credentials;
use docketwatch_core::{DaemonConfig, DaemonStatus};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{parse_json, ApiError};
use crate::HttpState;

/// Header carrying the session id on operation calls.
pub const SESSION_HEADER: &str = "x-session-id";

type ApiResult<T> = Result<T, ApiError>;

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ----------------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    login: String,
    #[serde(default)]
    password: String,
}

/// POST /sessions
pub async fn create_session(State(state): State<Arc<HttpState>>, body: Bytes) -> ApiResult<(StatusCode, Json<Value>)> {
    let request: Option<CreateSessionRequest> = parse_json(&body)?;
    let request = request.unwrap_or(CreateSessionRequest {
        login: String::new(),
        password: String::new(),
    });

    let sessions = &state.context.sessions;
    let id = sessions
        .create_session(Credentials::new(request.login, request.password))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "sessionId": id,
            "expiresInSeconds": sessions.config().idle_timeout.as_secs(),
        })),
    ))
}

/// GET /sessions
pub async fn list_sessions(State(state): State<Arc<HttpState>>) -> Json<Value> {
    Json(json!({ "sessions": state.context.sessions.list() }))
}

/// DELETE /sessions/{id}
///
/// Unknown ids succeed too, so a double close is harmless.
pub async fn close_session(State(state): State<Arc<HttpState>>, Path(id): Path<String>) -> Json<Value> {
    state.context.sessions.close_session(&id).await;
    Json(json!({ "success": true }))
}

// ----------------------------------------------------------------------------
// Operations
// ----------------------------------------------------------------------------

/// POST /api/operations/{operation}
pub async fn run_operation(
    State(state): State<Arc<HttpState>>,
    Path(operation): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payload: Value = parse_json(&body)?;
    let session_id = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());

    let outcome = state
        .context
        .router
        .handle(&operation, session_id, payload)
        .await?;
    Ok(Json(outcome.into_json()))
}

// ----------------------------------------------------------------------------
// Daemon
// ----------------------------------------------------------------------------

/// GET /daemon/status
pub async fn daemon_status(State(state): State<Arc<HttpState>>) -> Json<DaemonStatus> {
    Json(state.context.daemon.status())
}

/// POST /daemon/start
///
/// Without a body the stored configuration is used.
pub async fn daemon_start(State(state): State<Arc<HttpState>>, body: Bytes) -> ApiResult<Json<DaemonStatus>> {
    let config: Option<DaemonConfig> = parse_json(&body)?;
    let status = state.context.daemon.start(config).await?;
    Ok(Json(status))
}

/// POST /daemon/stop
pub async fn daemon_stop(State(state): State<Arc<HttpState>>) -> Json<DaemonStatus> {
    Json(state.context.daemon.stop().await)
}

/// GET /daemon/config
pub async fn daemon_config(State(state): State<Arc<HttpState>>) -> Json<Value> {
    Json(json!({ "config": state.context.daemon.config() }))
}

/// PUT /daemon/config
pub async fn update_daemon_config(State(state): State<Arc<HttpState>>, body: Bytes) -> ApiResult<Json<Value>> {
    let config: DaemonConfig = parse_json(&body)?;
    state.context.daemon.update_config(config)?;
    Ok(Json(json!({ "config": state.context.daemon.config() })))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use docketwatch_core::automation::MemoryAutomation;
    use docketwatch_core::DocketContext;
    use tower::ServiceExt;

    struct Fixture {
        memory: Arc<MemoryAutomation>,
        state: Arc<HttpState>,
    }

    impl Fixture {
        fn new() -> Self {
            let memory = Arc::new(MemoryAutomation::new());
            let ctx = DocketContext::builder(memory.clone()).build();
            Self {
                memory,
                state: Arc::new(HttpState::new(ctx)),
            }
        }

        async fn call(&self, method: &str, uri: &str, session: Option<&str>, body: &str) -> (StatusCode, Value) {
            let mut req = Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json");
            if let Some(session) = session {
                req = req.header("X-Session-Id", session);
            }
            let response = crate::router(Arc::clone(&self.state))
                .oneshot(req.body(Body::from(body.to_string())).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }

        async fn login(&self) -> String {
            let (status, body) = self
                .call("POST", "/sessions", None, r#"{"login":"lawyer","password":"pw"}"#)
                .await;
            assert_eq!(status, StatusCode::CREATED);
            body["sessionId"].as_str().unwrap().to_string()
        }
    }

    const DAEMON_BODY: &str = r#"{
        "browserEndpoint": "ws://127.0.0.1:9222",
        "watchTypes": ["deadlines"],
        "intervalMs": 60000
    }"#;

    mod health {
        use super::*;

        #[tokio::test]
        async fn reports_ok() {
            let f = Fixture::new();
            let (status, body) = f.call("GET", "/health", None, "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "ok");
        }
    }

    mod sessions {
        use super::*;

        #[tokio::test]
        async fn create_returns_id_and_expiry() {
            let f = Fixture::new();
            let (status, body) = f
                .call("POST", "/sessions", None, r#"{"login":"lawyer","password":"pw"}"#)
                .await;
            assert_eq!(status, StatusCode::CREATED);
            assert!(body["sessionId"].is_string());
            assert_eq!(body["expiresInSeconds"], 1800);
        }

        #[tokio::test]
        async fn missing_password_is_400() {
            let f = Fixture::new();
            let (status, body) = f.call("POST", "/sessions", None, r#"{"login":"lawyer"}"#).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["field"], "password");
            assert_eq!(f.memory.open_handles(), 0);
        }

        #[tokio::test]
        async fn rejected_login_is_401() {
            let f = Fixture::new();
            f.memory.reject_login("intruder");
            let (status, body) = f
                .call("POST", "/sessions", None, r#"{"login":"intruder","password":"pw"}"#)
                .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert!(body["error"].is_string());
            assert!(f.state.context.sessions.is_empty());
        }

        #[tokio::test]
        async fn list_shows_open_sessions() {
            let f = Fixture::new();
            let id = f.login().await;
            let (status, body) = f.call("GET", "/sessions", None, "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["sessions"][0]["id"], id.as_str());
            assert_eq!(body["sessions"][0]["owner"], "lawyer");
        }

        #[tokio::test]
        async fn delete_is_idempotent() {
            let f = Fixture::new();
            let id = f.login().await;
            let uri = format!("/sessions/{}", id);

            let (status, body) = f.call("DELETE", &uri, None, "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
            assert_eq!(f.memory.open_handles(), 0);

            let (status, _) = f.call("DELETE", &uri, None, "").await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    mod operations {
        use super::*;

        #[tokio::test]
        async fn data_operation_returns_result() {
            let f = Fixture::new();
            f.memory
                .set_result("list_deadlines", json!([{"id": "d1", "due": "2026-11-01"}]));
            let id = f.login().await;

            let (status, body) = f
                .call("POST", "/api/operations/list_deadlines", Some(&id), "")
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body[0]["id"], "d1");
        }

        #[tokio::test]
        async fn effect_operation_returns_success_flag() {
            let f = Fixture::new();
            let id = f.login().await;
            let (status, body) = f
                .call("POST", "/api/operations/sign_block", Some(&id), r#"{"blockId":"b1"}"#)
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({"success": true}));
        }

        #[tokio::test]
        async fn missing_session_header_is_401() {
            let f = Fixture::new();
            let (status, body) = f.call("POST", "/api/operations/list_deadlines", None, "").await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert!(body["error"].is_string());
        }

        #[tokio::test]
        async fn unknown_session_is_401() {
            let f = Fixture::new();
            let (status, _) = f
                .call("POST", "/api/operations/list_deadlines", Some("nope"), "")
                .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }

        #[tokio::test]
        async fn missing_field_is_400_before_session_lookup() {
            let f = Fixture::new();
            let (status, body) = f
                .call("POST", "/api/operations/sign_block", Some("nope"), "{}")
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["field"], "blockId");
        }

        #[tokio::test]
        async fn unknown_operation_is_404() {
            let f = Fixture::new();
            let id = f.login().await;
            let (status, _) = f.call("POST", "/api/operations/launch_rocket", Some(&id), "").await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn malformed_body_is_400() {
            let f = Fixture::new();
            let id = f.login().await;
            let (status, _) = f
                .call("POST", "/api/operations/sign_block", Some(&id), "{oops")
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    mod daemon {
        use super::*;

        #[tokio::test]
        async fn status_starts_stopped() {
            let f = Fixture::new();
            let (status, body) = f.call("GET", "/daemon/status", None, "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["running"], false);
            assert_eq!(body["state"], "stopped");
        }

        #[tokio::test]
        async fn start_then_stop() {
            let f = Fixture::new();
            let (status, body) = f.call("POST", "/daemon/start", None, DAEMON_BODY).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["running"], true);

            let (status, _) = f.call("POST", "/daemon/start", None, DAEMON_BODY).await;
            assert_eq!(status, StatusCode::CONFLICT);

            let (status, body) = f.call("POST", "/daemon/stop", None, "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["running"], false);
            assert_eq!(f.memory.open_handles(), 0);
        }

        #[tokio::test]
        async fn start_without_any_config_is_400() {
            let f = Fixture::new();
            let (status, _) = f.call("POST", "/daemon/start", None, "").await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        #[tokio::test]
        async fn invalid_config_is_400() {
            let f = Fixture::new();
            let (status, body) = f
                .call(
                    "POST",
                    "/daemon/start",
                    None,
                    r#"{"browserEndpoint":"ws://x","watchTypes":["deadlines"],"intervalMs":10}"#,
                )
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["field"], "intervalMs");
        }

        #[tokio::test]
        async fn config_round_trip_and_conflict_while_running() {
            let f = Fixture::new();
            let (status, body) = f.call("GET", "/daemon/config", None, "").await;
            assert_eq!(status, StatusCode::OK);
            assert!(body["config"].is_null());

            let (status, body) = f.call("PUT", "/daemon/config", None, DAEMON_BODY).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["config"]["watchTypes"][0], "deadlines");

            // Empty start body falls back to the stored config.
            let (status, _) = f.call("POST", "/daemon/start", None, "").await;
            assert_eq!(status, StatusCode::OK);

            let (status, _) = f.call("PUT", "/daemon/config", None, DAEMON_BODY).await;
            assert_eq!(status, StatusCode::CONFLICT);

            f.call("POST", "/daemon/stop", None, "").await;
        }

        #[tokio::test]
        async fn password_never_leaves_the_server() {
            let f = Fixture::new();
            f.call(
                "PUT",
                "/daemon/config",
                None,
                r#"{"credentials":{"login":"bot","password":"hunter2"},"watchTypes":["deadlines"]}"#,
            )
            .await;
            let (_, body) = f.call("GET", "/daemon/config", None, "").await;
            assert_eq!(body["config"]["credentials"]["login"], "bot");
            assert!(!body.to_string().contains("hunter2"));
        }
    }
}
