//! Built-in advice bundles, each registered at a fixed order
//!
//! | order | aspect    | slot          | default rule        |
//! |-------|-----------|---------------|---------------------|
//! | 0     | security  | before        | `@Secured`          |
//! | 1     | logging   | all five      | `within(*Service)`  |
//! | 2     | audit     | after_success | `@Auditable`        |
//! | 3     | retry     | around        | `@Retry`            |
//! | 4     | exception | after_failure | `within(*Service)`  |

pub mod audit;
pub mod exception;
pub mod logging;
pub mod security;

pub use security::{Principal, SecurityContext};

use crate::audit::AuditTrail;
use crate::error::WeaverResult;
use crate::intercept::{AdviceId, InterceptionRegistry, RETRY_TAG, RetryAdvice};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const SECURITY_ORDER: i32 = 0;
pub const LOGGING_ORDER: i32 = 1;
pub const AUDIT_ORDER: i32 = 2;
pub const RETRY_ORDER: i32 = 3;
pub const EXCEPTION_ORDER: i32 = 4;

fn default_service_rule() -> String {
    "within(*Service)".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    crate::intercept::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    crate::intercept::retry::DEFAULT_DELAY.as_millis() as u64
}

/// Which aspects to install and where the configurable ones apply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AspectsConfig {
    #[serde(default = "default_true")]
    pub security: bool,
    #[serde(default = "default_true")]
    pub audit: bool,
    #[serde(default = "default_true")]
    pub retry: bool,
    /// Rule for the logging aspect; `None` disables it
    #[serde(default = "logging_rule_default")]
    pub logging_rule: Option<String>,
    /// Rule for the exception aspect; `None` disables it
    #[serde(default = "logging_rule_default")]
    pub exception_rule: Option<String>,
    /// Used when a `@Retry` tag carries no `max_attempts`
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,
    /// Used when a `@Retry` tag carries no `delay_ms`
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn logging_rule_default() -> Option<String> {
    Some(default_service_rule())
}

impl Default for AspectsConfig {
    fn default() -> Self {
        Self {
            security: true,
            audit: true,
            retry: true,
            logging_rule: logging_rule_default(),
            exception_rule: logging_rule_default(),
            retry_max_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Install the configured aspects; returns every registered advice id
pub fn install(
    registry: &InterceptionRegistry,
    config: &AspectsConfig,
    security: Arc<SecurityContext>,
    trail: Arc<AuditTrail>,
) -> WeaverResult<Vec<AdviceId>> {
    let mut ids = Vec::new();

    if config.security {
        ids.push(security::install(registry, Arc::clone(&security))?);
    }
    if let Some(rule) = &config.logging_rule {
        ids.extend(logging::install(registry, rule)?);
    }
    if config.audit {
        ids.push(audit::install(registry, trail, security)?);
    }
    if config.retry {
        let retry = RetryAdvice::fixed(
            config.retry_max_attempts,
            Duration::from_millis(config.retry_delay_ms),
        );
        ids.push(registry.retry(&format!("@{}", RETRY_TAG), RETRY_ORDER, retry)?);
    }
    if let Some(rule) = &config.exception_rule {
        ids.push(exception::install(registry, rule)?);
    }

    info!(advice = ids.len(), "aspects installed");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::{AdviceKind, Tag, Target};
    use serde_json::json;

    #[test]
    fn full_stack_dispatch_order() {
        let registry = InterceptionRegistry::new();
        let security = Arc::new(SecurityContext::authenticated(Principal::new(
            "john.doe",
            ["USER", "ADMIN"],
        )));
        install(
            &registry,
            &AspectsConfig::default(),
            security,
            Arc::new(AuditTrail::in_memory()),
        )
        .unwrap();

        let target = Target::new("PaymentService", "processPayment")
            .with_tag(Tag::new("Secured").with("roles", json!(["USER"])))
            .tagged("Auditable")
            .tagged(RETRY_TAG);

        let plan: Vec<_> = registry
            .advice_for(&target)
            .into_iter()
            .map(|d| (d.order, d.name))
            .collect();
        let orders: Vec<_> = plan.iter().map(|(o, _)| *o).collect();
        let mut sorted = orders.clone();
        sorted.sort();
        assert_eq!(orders, sorted);
        assert_eq!(plan.first().map(|(_, n)| n.as_str()), Some("security.check"));
        assert_eq!(plan.last().map(|(_, n)| n.as_str()), Some("exception.report"));

        let arounds: Vec<_> = registry
            .advice_for(&target)
            .into_iter()
            .filter(|d| d.kind == AdviceKind::Around)
            .map(|d| d.name)
            .collect();
        assert_eq!(arounds, vec!["log.timing", "retry"]);
    }

    #[test]
    fn disabled_aspects_are_not_registered() {
        let registry = InterceptionRegistry::new();
        let config = AspectsConfig {
            security: false,
            audit: false,
            retry: false,
            logging_rule: None,
            exception_rule: None,
            ..AspectsConfig::default()
        };
        let ids = install(
            &registry,
            &config,
            Arc::new(SecurityContext::new()),
            Arc::new(AuditTrail::in_memory()),
        )
        .unwrap();
        assert!(ids.is_empty());
        assert!(registry.is_empty());
    }
}
