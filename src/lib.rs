pub mod activity;
pub mod aspects;
pub mod audit;
pub mod conditional;
pub mod config;
pub mod demo;
pub mod error;
pub mod features;
pub mod health;
pub mod info;
pub mod intercept;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod users;

pub use config::{AppConfig, CliArgs, RunMode};
pub use demo::Application;
pub use error::{ErrorCode, WeaverError, WeaverResult};
pub use logging::{LoggingConfig, init_logging};
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};

use anyhow::{Context, Result};
use shutdown::{AuditShutdownHandler, ComponentShutdownHandler};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Dispatch on `config.mode`
pub async fn run(config: AppConfig) -> Result<()> {
    tracing::info!(mode = %config.mode, "starting weaver");
    match config.mode {
        RunMode::Demo => run_demo(config),
        RunMode::Serve => run_server(config).await,
    }
}

/// Build the application, run the scripted walkthrough, then tear it down
pub fn run_demo(config: AppConfig) -> Result<()> {
    let app = Application::build(&config)?;
    let result = demo::run_demo(&app);

    let destroyed = app.components.shutdown();
    tracing::debug!(components = ?destroyed, "demo components destroyed");
    if let Err(e) = app.audit.flush() {
        tracing::warn!(error = %e, "failed to flush audit trail");
    }
    result
}

pub async fn run_server(config: AppConfig) -> Result<()> {
    let app = Application::build(&config)?;

    let shutdown_config = ShutdownConfig::default().with_total_timeout(config.shutdown_timeout_secs);
    let coordinator = Arc::new(ShutdownCoordinator::new(shutdown_config));
    coordinator.add_handler(Arc::new(ComponentShutdownHandler::new(Arc::clone(
        &app.components,
    ))));
    coordinator.add_handler(Arc::new(AuditShutdownHandler::new(Arc::clone(&app.audit))));

    let router = server::router(app.app_state());
    let listener = TcpListener::bind(config.http_bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind_address))?;
    let actual_addr = listener.local_addr()?;
    tracing::info!(transport = "http", bind = %actual_addr, "listening");

    let signal_coordinator = Arc::clone(&coordinator);
    let server_result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal_coordinator.wait_for_signal().await;
        })
        .await;

    tracing::info!("server stopped, running shutdown handlers");
    if let Err(e) = coordinator.shutdown().await {
        tracing::error!(error = %e, "error during shutdown");
    }

    server_result.context("http server failed")
}
