//! Health indicators and the actuator health endpoints

use crate::audit::AuditTrail;
use crate::conditional::ComponentRegistry;
use anyhow::Result;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::SystemTime;

/// Usage ratio at which a [`UsageHealthIndicator`] reports degraded
pub const WARNING_THRESHOLD: f64 = 0.8;
/// Usage ratio at which a [`UsageHealthIndicator`] reports unhealthy
pub const CRITICAL_THRESHOLD: f64 = 0.9;

/// Health status for a component or the overall system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but something needs attention
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The worse of the two
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Result of one indicator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn build(
        component: impl Into<String>,
        status: HealthStatus,
        error: Option<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            error,
            timestamp: now(),
            details,
        }
    }

    pub fn healthy(component: impl Into<String>) -> Self {
        Self::build(component, HealthStatus::Healthy, None, None)
    }

    pub fn healthy_with_details(component: impl Into<String>, details: serde_json::Value) -> Self {
        Self::build(component, HealthStatus::Healthy, None, Some(details))
    }

    pub fn degraded_with_details(
        component: impl Into<String>,
        error: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::build(
            component,
            HealthStatus::Degraded,
            Some(error.into()),
            Some(details),
        )
    }

    pub fn unhealthy(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self::build(component, HealthStatus::Unhealthy, Some(error.into()), None)
    }

    pub fn unhealthy_with_details(
        component: impl Into<String>,
        error: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::build(
            component,
            HealthStatus::Unhealthy,
            Some(error.into()),
            Some(details),
        )
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// A named health probe
pub trait HealthIndicator: Send + Sync {
    fn name(&self) -> &str;

    fn health(&self) -> ComponentHealth;
}

/// Reports the worst status of its children, with each child under `details`
pub struct CompositeHealthIndicator {
    name: String,
    children: Vec<Arc<dyn HealthIndicator>>,
}

impl CompositeHealthIndicator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn with(mut self, child: Arc<dyn HealthIndicator>) -> Self {
        self.children.push(child);
        self
    }
}

impl HealthIndicator for CompositeHealthIndicator {
    fn name(&self) -> &str {
        &self.name
    }

    fn health(&self) -> ComponentHealth {
        let mut overall = HealthStatus::Healthy;
        let mut details = serde_json::Map::new();
        let mut failing = Vec::new();

        for child in &self.children {
            let health = child.health();
            overall = overall.combine(health.status);
            if health.status != HealthStatus::Healthy {
                failing.push(child.name().to_string());
            }
            details.insert(child.name().to_string(), json!(health));
        }

        ComponentHealth::build(
            &self.name,
            overall,
            (!failing.is_empty()).then(|| format!("not healthy: {}", failing.join(", "))),
            Some(serde_json::Value::Object(details)),
        )
    }
}

type UsageProbe = dyn Fn() -> Result<(u64, u64)> + Send + Sync;

/// Turns a `(used, total)` probe into a status via the usage thresholds
pub struct UsageHealthIndicator {
    name: String,
    probe: Box<UsageProbe>,
    warning: f64,
    critical: f64,
}

impl UsageHealthIndicator {
    pub fn new<F>(name: impl Into<String>, probe: F) -> Self
    where
        F: Fn() -> Result<(u64, u64)> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            probe: Box::new(probe),
            warning: WARNING_THRESHOLD,
            critical: CRITICAL_THRESHOLD,
        }
    }

    pub fn with_thresholds(mut self, warning: f64, critical: f64) -> Self {
        self.warning = warning;
        self.critical = critical;
        self
    }

    /// Fill level of the audit trail's in-memory buffer
    pub fn audit_buffer(trail: Arc<AuditTrail>) -> Self {
        Self::new("auditBuffer", move || {
            Ok((trail.len() as u64, trail.capacity() as u64))
        })
    }
}

impl HealthIndicator for UsageHealthIndicator {
    fn name(&self) -> &str {
        &self.name
    }

    fn health(&self) -> ComponentHealth {
        let (used, total) = match (self.probe)() {
            Ok(sample) => sample,
            Err(e) => return ComponentHealth::unhealthy(&self.name, format!("probe failed: {e:#}")),
        };
        let ratio = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64
        };
        let details = json!({
            "used": used,
            "total": total,
            "usedPercentage": (ratio * 10_000.0).round() / 100.0,
        });

        if ratio >= self.critical {
            ComponentHealth::unhealthy_with_details(
                &self.name,
                format!("usage critical: {:.1}%", ratio * 100.0),
                details,
            )
        } else if ratio >= self.warning {
            ComponentHealth::degraded_with_details(
                &self.name,
                format!("usage high: {:.1}%", ratio * 100.0),
                details,
            )
        } else {
            ComponentHealth::healthy_with_details(&self.name, details)
        }
    }
}

/// Realized components and the condition report
pub struct ComponentsHealthIndicator {
    registry: Arc<ComponentRegistry>,
}

impl ComponentsHealthIndicator {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }
}

impl HealthIndicator for ComponentsHealthIndicator {
    fn name(&self) -> &str {
        "components"
    }

    fn health(&self) -> ComponentHealth {
        let report = self.registry.condition_report();
        let matched = report
            .iter()
            .filter(|e| e.outcome.as_ref().is_some_and(|o| o.matched))
            .count();
        ComponentHealth::healthy_with_details(
            "components",
            json!({
                "registered": self.registry.names(),
                "realized": self.registry.realized(),
                "defaultsMatched": matched,
                "defaultsEvaluated": report.iter().filter(|e| e.outcome.is_some()).count(),
            }),
        )
    }
}

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    /// Indicators reporting unhealthy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<String>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

/// Per-indicator detail, in registration order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: IndexMap<String, ComponentHealth>,
}

impl IntoResponse for ComponentHealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

#[derive(Clone, Default)]
pub struct HealthChecker {
    indicators: Vec<Arc<dyn HealthIndicator>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_indicator(mut self, indicator: Arc<dyn HealthIndicator>) -> Self {
        self.indicators.push(indicator);
        self
    }

    /// Healthy whenever the process can answer
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Ready unless some indicator is unhealthy
    pub fn readiness(&self) -> ReadinessResponse {
        let components = self.check_all();
        let mut overall = HealthStatus::Healthy;
        let mut not_ready = Vec::new();

        for (name, health) in &components {
            overall = overall.combine(health.status);
            if health.status == HealthStatus::Unhealthy {
                not_ready.push(name.clone());
            }
        }

        ReadinessResponse {
            ready: overall != HealthStatus::Unhealthy,
            status: overall,
            timestamp: now(),
            not_ready,
        }
    }

    pub fn components(&self) -> ComponentHealthResponse {
        let components = self.check_all();
        let status = components
            .values()
            .fold(HealthStatus::Healthy, |acc, h| acc.combine(h.status));

        ComponentHealthResponse {
            status,
            timestamp: now(),
            components,
        }
    }

    fn check_all(&self) -> IndexMap<String, ComponentHealth> {
        self.indicators
            .iter()
            .map(|indicator| {
                let health = indicator.health();
                if health.status != HealthStatus::Healthy {
                    tracing::warn!(
                        indicator = indicator.name(),
                        status = ?health.status,
                        error = ?health.error,
                        "health indicator not healthy"
                    );
                }
                (indicator.name().to_string(), health)
            })
            .collect()
    }
}

/// GET /actuator/health
pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> HealthResponse {
    checker.liveness()
}

/// GET /actuator/health/readiness
pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> ReadinessResponse {
    checker.readiness()
}

/// GET /actuator/health/components
pub async fn components_handler(
    State(checker): State<Arc<HealthChecker>>,
) -> ComponentHealthResponse {
    checker.components()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditional::{Environment, always};
    use anyhow::anyhow;

    fn fixed(name: &str, used: u64, total: u64) -> Arc<dyn HealthIndicator> {
        Arc::new(UsageHealthIndicator::new(name, move || Ok((used, total))))
    }

    #[test]
    fn combine_keeps_the_worst() {
        use HealthStatus::*;
        assert_eq!(Healthy.combine(Healthy), Healthy);
        assert_eq!(Healthy.combine(Degraded), Degraded);
        assert_eq!(Degraded.combine(Unhealthy), Unhealthy);
        assert_eq!(Unhealthy.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Degraded.status_code(), StatusCode::OK);
    }

    #[test]
    fn usage_thresholds() {
        assert_eq!(fixed("m", 50, 100).health().status, HealthStatus::Healthy);
        assert_eq!(fixed("m", 80, 100).health().status, HealthStatus::Degraded);
        assert_eq!(fixed("m", 95, 100).health().status, HealthStatus::Unhealthy);
        assert_eq!(fixed("m", 0, 0).health().status, HealthStatus::Healthy);

        let details = fixed("m", 1, 3).health().details.unwrap();
        assert_eq!(details["usedPercentage"], json!(33.33));
    }

    #[test]
    fn failing_probe_is_unhealthy() {
        let indicator = UsageHealthIndicator::new("disk", || Err(anyhow!("no mount")));
        let health = indicator.health();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(health.error.unwrap().contains("no mount"));
    }

    #[test]
    fn composite_reports_children() {
        let composite = CompositeHealthIndicator::new("custom")
            .with(fixed("cache", 10, 100))
            .with(fixed("queue", 85, 100));
        let health = composite.health();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.error.as_deref(), Some("not healthy: queue"));
        let details = health.details.unwrap();
        assert_eq!(details["cache"]["status"], json!("healthy"));
        assert_eq!(details["queue"]["status"], json!("degraded"));
    }

    #[test]
    fn readiness_lists_unhealthy_indicators() {
        let checker = HealthChecker::new()
            .with_indicator(fixed("memory", 10, 100))
            .with_indicator(fixed("disk", 99, 100));

        let readiness = checker.readiness();
        assert!(!readiness.ready);
        assert_eq!(readiness.not_ready, vec!["disk".to_string()]);

        let components = checker.components();
        assert_eq!(components.status, HealthStatus::Unhealthy);
        let names: Vec<_> = components.components.keys().cloned().collect();
        assert_eq!(names, vec!["memory", "disk"]);
        assert_eq!(checker.liveness().status, HealthStatus::Healthy);
    }

    #[test]
    fn components_indicator_reflects_registry() {
        let registry = Arc::new(ComponentRegistry::new(Environment::new()));
        registry.register_factory("clock", always(), |_| Ok(42u64));
        registry.resolve("clock").unwrap();

        let health = ComponentsHealthIndicator::new(registry).health();
        let details = health.details.unwrap();
        assert_eq!(details["realized"], json!(["clock"]));
        assert_eq!(details["defaultsMatched"], json!(1));
    }

    #[test]
    fn audit_buffer_usage() {
        let trail = Arc::new(AuditTrail::in_memory());
        let health = UsageHealthIndicator::audit_buffer(trail).health();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.details.unwrap()["used"], json!(0));
    }
}
