//! HTTP server for docketwatch.
//!
//! Exposes sessions, portal operations and daemon control over REST, and
//! EventBus events over a WebSocket at `/ws/events`.

mod auth;
mod error;
mod routes;
mod state;
mod websocket;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

pub use error::ApiError;
pub use routes::SESSION_HEADER;
pub use state::HttpState;

/// Build the application router.
///
/// Everything except `/health` sits behind the token check.
pub fn router(state: Arc<HttpState>) -> Router {
    let protected = Router::new()
        .route("/sessions", post(routes::create_session).get(routes::list_sessions))
        .route("/sessions/{id}", delete(routes::close_session))
        .route("/api/operations/{operation}", post(routes::run_operation))
        .route("/daemon/status", get(routes::daemon_status))
        .route("/daemon/start", post(routes::daemon_start))
        .route("/daemon/stop", post(routes::daemon_stop))
        .route(
            "/daemon/config",
            get(routes::daemon_config).put(routes::update_daemon_config),
        )
        .route("/ws/events", get(websocket::ws_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::health))
        .merge(protected)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Handle to a running HTTP server.
#[derive(Default)]
pub struct HttpServerHandle {
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HttpServerHandle {
    /// Address the server is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("HTTP server task ended abnormally: {}", e);
            }
        }
    }
}

/// Bind `host:port` and serve on the current runtime.
///
/// Binding happens before this returns, so a taken port is reported here.
pub async fn start(state: Arc<HttpState>, host: &str, port: u16) -> Result<HttpServerHandle, String> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind HTTP server to {}: {}", addr, e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {}", e))?;
    log::info!("HTTP server listening on http://{}", local_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = router(state);
    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                log::info!("HTTP server shutting down");
            })
            .await;
        if let Err(e) = result {
            log::error!("HTTP server error: {}", e);
        }
    });

    Ok(HttpServerHandle {
        local_addr: Some(local_addr),
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

// ============================================================================
// TESTS
// ============================================================================
