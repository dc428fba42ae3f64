//! docketwatch service process.
//!
//! Wires the core services behind the HTTP API and runs until SIGINT or
//! SIGTERM. Shutdown order: stop accepting requests, stop the daemon,
//! then close every session.

mod cli;

use anyhow::Context;
use clap::Parser;
use docketwatch_core::automation::{Automation, DriverClient, MemoryAutomation, TimedAutomation};
use docketwatch_core::notify::{NotificationDispatcher, SendmailChannel, WebhookChannel};
use docketwatch_core::persistence::BaselineStore;
use docketwatch_core::DocketContext;
use docketwatch_http::HttpState;
use std::sync::Arc;

use cli::{Backend, Cli, ServiceConfig};

fn init_logging(level: Option<&str>) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.init();
}

fn build_context(config: &ServiceConfig) -> DocketContext {
    let backend: Arc<dyn Automation> = match &config.backend {
        Backend::Memory => {
            log::warn!("Using the in-memory automation backend; no portal will be contacted");
            Arc::new(MemoryAutomation::new())
        }
        Backend::Driver(url) => Arc::new(DriverClient::new(url.clone(), config.automation_timeout)),
    };
    let automation = Arc::new(TimedAutomation::new(backend, config.automation_timeout));

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(SendmailChannel::new(
            config.sendmail_path.clone(),
            config.mail_from.clone(),
        )),
        Arc::new(WebhookChannel::new(config.notify_timeout)),
        config.notify_timeout,
    ));

    let mut builder = DocketContext::builder(automation)
        .session_config(config.session)
        .dispatcher(dispatcher);
    match &config.state_dir {
        Some(dir) => {
            log::info!("Persisting daemon baselines in {}", dir.display());
            builder = builder.baseline_store(BaselineStore::new(dir.clone()));
        }
        None => log::info!("Daemon baselines are kept in memory only"),
    }
    builder.build()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl+C"),
        _ = terminate => log::info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let config = cli.into_service_config().map_err(anyhow::Error::msg)?;
    let context = build_context(&config);
    context.start_background_tasks();

    let state = Arc::new(HttpState::new(context.clone()).with_auth_token(config.api_token.clone()));
    if state.auth_token.is_none() {
        log::warn!("No API token configured; the HTTP API is unauthenticated");
    }
    let mut server = docketwatch_http::start(state, &config.host, config.port)
        .await
        .map_err(anyhow::Error::msg)
        .context("Failed to start HTTP server")?;

    shutdown_signal().await;

    server.stop().await;
    context.shutdown().await;
    log::info!("Shutdown complete");
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
