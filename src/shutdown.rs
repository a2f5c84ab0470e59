//! Graceful shutdown coordination
//!
//! Shutdown proceeds in two phases:
//!
//! 1. **Drain** - the cancellation token fires; the HTTP server stops
//!    accepting connections and finishes in-flight requests
//! 2. **Destroy** - registered handlers run in order, most importantly the
//!    component registry's destroy hooks (reverse realization order)
//!
//! The destroy phase is bounded by `ShutdownConfig::total_timeout`.

use crate::audit::AuditTrail;
use crate::conditional::ComponentRegistry;
use anyhow::{Result, anyhow};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Upper bound for the destroy phase
    pub total_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(30),
        }
    }
}

impl ShutdownConfig {
    pub fn with_total_timeout(mut self, timeout_secs: u64) -> Self {
        self.total_timeout = Duration::from_secs(timeout_secs);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Draining,
    Destroying,
    Complete,
    /// Destroy phase hit the timeout
    Forced,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::Draining => write!(f, "draining"),
            ShutdownPhase::Destroying => write!(f, "destroying"),
            ShutdownPhase::Complete => write!(f, "complete"),
            ShutdownPhase::Forced => write!(f, "forced"),
        }
    }
}

/// Something to tear down once traffic has stopped
pub trait ShutdownHandler: Send + Sync {
    fn name(&self) -> &str;

    fn shutdown(&self) -> Result<()>;
}

/// Runs the registry's destroy hooks
pub struct ComponentShutdownHandler {
    registry: Arc<ComponentRegistry>,
}

impl ComponentShutdownHandler {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }
}

impl ShutdownHandler for ComponentShutdownHandler {
    fn name(&self) -> &str {
        "components"
    }

    fn shutdown(&self) -> Result<()> {
        let destroyed = self.registry.shutdown();
        info!(components = ?destroyed, "components destroyed");
        Ok(())
    }
}

/// Flushes the audit log
pub struct AuditShutdownHandler {
    trail: Arc<AuditTrail>,
}

impl AuditShutdownHandler {
    pub fn new(trail: Arc<AuditTrail>) -> Self {
        Self { trail }
    }
}

impl ShutdownHandler for AuditShutdownHandler {
    fn name(&self) -> &str {
        "audit"
    }

    fn shutdown(&self) -> Result<()> {
        info!(buffered_events = self.trail.len(), "flushing audit trail");
        self.trail.flush()
    }
}

pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: RwLock<ShutdownPhase>,
    token: CancellationToken,
    handlers: RwLock<Vec<Arc<dyn ShutdownHandler>>>,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            phase: RwLock::new(ShutdownPhase::Running),
            token: CancellationToken::new(),
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Handlers run in registration order
    pub fn add_handler(&self, handler: Arc<dyn ShutdownHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.read()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Begin draining
    pub fn initiate(&self) {
        if !self.token.is_cancelled() {
            *self.phase.write() = ShutdownPhase::Draining;
            self.token.cancel();
        }
    }

    /// Resolve on SIGINT, SIGTERM or `initiate`, then start draining
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT (Ctrl+C), initiating graceful shutdown"),
            _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
            _ = self.token.cancelled() => info!("shutdown requested"),
        }
        self.initiate();
    }

    /// Run every handler; errors are logged and the rest still run
    pub async fn shutdown(&self) -> Result<()> {
        self.initiate();
        *self.phase.write() = ShutdownPhase::Destroying;
        let handlers = self.handlers.read().clone();
        info!(handlers = handlers.len(), "running shutdown handlers");

        let work = tokio::task::spawn_blocking(move || {
            for handler in handlers {
                if let Err(e) = handler.shutdown() {
                    error!(handler = handler.name(), error = %e, "shutdown handler failed");
                }
            }
        });

        match timeout(self.config.total_timeout, work).await {
            Ok(Ok(())) => {
                *self.phase.write() = ShutdownPhase::Complete;
                info!("graceful shutdown complete");
                Ok(())
            }
            Ok(Err(join)) => {
                *self.phase.write() = ShutdownPhase::Forced;
                Err(anyhow!("shutdown handlers panicked: {join}"))
            }
            Err(_) => {
                *self.phase.write() = ShutdownPhase::Forced;
                warn!(
                    timeout_secs = self.config.total_timeout.as_secs(),
                    "shutdown handlers exceeded timeout"
                );
                Err(anyhow!("shutdown timeout exceeded"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditional::{Environment, always};
    use parking_lot::Mutex;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl ShutdownHandler for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn shutdown(&self) -> Result<()> {
            self.log.lock().push(self.name);
            if self.fail {
                Err(anyhow!("{} broke", self.name))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn phase_display() {
        assert_eq!(ShutdownPhase::Running.to_string(), "running");
        assert_eq!(ShutdownPhase::Destroying.to_string(), "destroying");
        assert_eq!(ShutdownPhase::Forced.to_string(), "forced");
    }

    #[tokio::test]
    async fn handlers_run_in_order_despite_failures() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        for (name, fail) in [("first", true), ("second", false)] {
            coordinator.add_handler(Arc::new(Recording {
                name,
                log: Arc::clone(&log),
                fail,
            }));
        }

        let token = coordinator.token();
        coordinator.shutdown().await.unwrap();
        assert!(token.is_cancelled());
        assert_eq!(coordinator.phase(), ShutdownPhase::Complete);
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn wait_for_signal_returns_on_initiate() {
        let coordinator = Arc::new(ShutdownCoordinator::new(ShutdownConfig::default()));
        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.wait_for_signal().await })
        };
        coordinator.initiate();
        waiter.await.unwrap();
        assert_eq!(coordinator.phase(), ShutdownPhase::Draining);
    }

    #[tokio::test]
    async fn component_handler_destroys_registry() {
        let registry = Arc::new(ComponentRegistry::new(Environment::new()));
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            registry.register_factory(name, always(), |_| Ok(()));
            let destroyed = Arc::clone(&destroyed);
            registry
                .on_destroy(name, move |_| {
                    destroyed.lock().push(name);
                    Ok(())
                })
                .unwrap();
            registry.resolve(name).unwrap();
        }

        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        coordinator.add_handler(Arc::new(ComponentShutdownHandler::new(registry)));
        coordinator.shutdown().await.unwrap();
        assert_eq!(*destroyed.lock(), vec!["b", "a"]);
    }
}
