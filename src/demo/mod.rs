//! Composition root and the scripted walkthrough
//!
//! `Application::build` wires every registry explicitly: the interception
//! registry with the built-in aspects, the component registry with the
//! auto-configured greeting components and the order services, and the
//! stores behind the HTTP surface.

pub mod greeting;
pub mod orders;

use crate::activity::ActivityService;
use crate::aspects::{self, Principal, SecurityContext};
use crate::audit::{AuditFilter, AuditTrail};
use crate::conditional::ComponentRegistry;
use crate::config::{AppConfig, RunMode};
use crate::features::FeatureStore;
use crate::health::{
    CompositeHealthIndicator, ComponentsHealthIndicator, HealthChecker, UsageHealthIndicator,
};
use crate::info::InfoContributor;
use crate::intercept::InterceptionRegistry;
use crate::logging::scenario_span;
use crate::server::AppState;
use crate::users::UserService;
use anyhow::{Context, Result};
use greeting::{Feature, Greeter, GREETING_SERVICE};
use orders::{OrderService, PaymentService};
use std::sync::Arc;
use tracing::{info, warn};

pub const ORDER_COMPONENT: &str = "orderService";
pub const PAYMENT_COMPONENT: &str = "paymentService";

const DEMO_PRINCIPAL: &str = "john.doe";
const DEMO_ROLES: [&str; 2] = ["USER", "ADMIN"];

const FEATURE_COMPONENTS: [&str; 6] = [
    "cacheFeature",
    "loggingFeature",
    "customConfigPath",
    "productionMarker",
    "defaultService",
    "dataSourceReport",
];

pub struct Application {
    pub interception: Arc<InterceptionRegistry>,
    pub components: Arc<ComponentRegistry>,
    pub security: Arc<SecurityContext>,
    pub audit: Arc<AuditTrail>,
    pub features: Arc<FeatureStore>,
    pub users: Arc<UserService>,
    pub activity: Arc<ActivityService>,
    pub info: Arc<InfoContributor>,
}

impl Application {
    pub fn build(config: &AppConfig) -> Result<Self> {
        let audit = Arc::new(
            AuditTrail::new(config.audit.clone()).context("failed to open audit trail")?,
        );

        let security = Arc::new(SecurityContext::new());
        match (&config.principal, config.mode) {
            (Some(name), _) => {
                security.authenticate(Principal::new(name.clone(), config.roles.iter().cloned()))
            }
            (None, RunMode::Demo) => {
                security.authenticate(Principal::new(DEMO_PRINCIPAL, DEMO_ROLES))
            }
            (None, RunMode::Serve) => {}
        }

        let interception = Arc::new(InterceptionRegistry::new());
        aspects::install(
            &interception,
            &config.aspects,
            Arc::clone(&security),
            Arc::clone(&audit),
        )?;

        let components = Arc::new(ComponentRegistry::new(config.environment()));
        greeting::register_auto_configuration(&components);

        let retry_delay_ms = config.aspects.retry_delay_ms;
        let orders_interception = Arc::clone(&interception);
        components.register_user(ORDER_COMPONENT, move |_| {
            Ok(OrderService::new(Arc::clone(&orders_interception)).with_retry_delay_ms(retry_delay_ms))
        });
        let payments_interception = Arc::clone(&interception);
        components.register_user(PAYMENT_COMPONENT, move |_| {
            Ok(PaymentService::new(Arc::clone(&payments_interception)))
        });
        for name in [ORDER_COMPONENT, PAYMENT_COMPONENT] {
            components.on_destroy(name, move |_| {
                info!(component = name, "releasing service");
                Ok(())
            })?;
        }

        info!(
            advice = interception.len(),
            components = components.names().len(),
            principal = ?security.principal_name(),
            "application assembled"
        );

        Ok(Self {
            interception,
            components,
            security,
            audit,
            features: Arc::new(FeatureStore::new()),
            users: Arc::new(UserService::new()),
            activity: Arc::new(ActivityService::new()),
            info: Arc::new(InfoContributor::new()),
        })
    }

    pub fn orders(&self) -> Result<Arc<OrderService>> {
        self.components.resolve_as(ORDER_COMPONENT)
    }

    pub fn payments(&self) -> Result<Arc<PaymentService>> {
        self.components.resolve_as(PAYMENT_COMPONENT)
    }

    pub fn health_checker(&self) -> HealthChecker {
        let audit_buffer: Arc<UsageHealthIndicator> =
            Arc::new(UsageHealthIndicator::audit_buffer(Arc::clone(&self.audit)));
        let users = Arc::clone(&self.users);
        let user_store = Arc::new(UsageHealthIndicator::new("userStore", move || {
            Ok((users.len() as u64, u64::from(u16::MAX)))
        }));

        HealthChecker::new()
            .with_indicator(Arc::new(ComponentsHealthIndicator::new(Arc::clone(
                &self.components,
            ))))
            .with_indicator(audit_buffer.clone())
            .with_indicator(Arc::new(
                CompositeHealthIndicator::new("custom")
                    .with(audit_buffer)
                    .with(user_store),
            ))
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            health: Arc::new(self.health_checker()),
            features: Arc::clone(&self.features),
            users: Arc::clone(&self.users),
            activity: Arc::clone(&self.activity),
            info: Arc::clone(&self.info),
        }
    }
}

fn banner(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("{title}");
    println!("{}", "=".repeat(60));
}

/// Walk through every aspect and the auto-configured components
pub fn run_demo(app: &Application) -> Result<()> {
    let orders = app.orders()?;
    let payments = app.payments()?;

    {
        let _span = scenario_span("advice-types").entered();
        banner("DEMO 1: ADVICE TYPES (before, after, after-success, around)");
        let status = orders.order_status("ORD-001")?;
        println!("Final result: {status}");
    }

    {
        let _span = scenario_span("security").entered();
        banner("DEMO 2: SECURITY ASPECT (@Secured)");
        match orders.cancel_order("ORD-001") {
            Ok(()) => println!("Order ORD-001 cancelled"),
            Err(e) => println!("Cancellation refused: {e}"),
        }
    }

    {
        let _span = scenario_span("audit").entered();
        banner("DEMO 3: AUDIT ASPECT (@Auditable)");
        match orders.create_order("PROD-123", 2) {
            Ok(order_id) => println!("Created {order_id}"),
            Err(e) => println!("Order refused: {e}"),
        }
        payments.process_payment("ORD-001", 99.99)?;
        for event in app.audit.query(&AuditFilter::new().with_limit(10)) {
            println!(
                "  audit: {} {} by {} -> {}",
                event.action,
                event.target,
                event.principal.as_deref().unwrap_or("anonymous"),
                event.result
            );
        }
    }

    {
        let _span = scenario_span("retry").entered();
        banner("DEMO 4: RETRY ASPECT (@Retry)");
        match orders.process_payment("ORD-001") {
            Ok(()) => println!("Payment for ORD-001 processed"),
            Err(e) => println!("Payment failed: {e:#}"),
        }
    }

    {
        let _span = scenario_span("exception-handling").entered();
        banner("DEMO 5: EXCEPTION HANDLING ASPECT (after-failure)");
        if let Err(e) = orders.failing_method() {
            println!("Exception caught in main: {e}");
        }
    }

    {
        let _span = scenario_span("auto-configuration").entered();
        banner("DEMO 6: CONDITIONAL AUTO-CONFIGURATION");
        match app.components.resolve_as::<Greeter>(GREETING_SERVICE) {
            Ok(greeter) => {
                println!("Greeting: {}", greeter.greet("World"));
                println!("Greeting prefix: {}", greeter.prefix());
            }
            Err(e) => println!("Greeting service not available: {e}"),
        }
        if let Err(e) = app.components.resolve(greeting::DATA_SOURCE) {
            warn!(error = %e, "no data source configured");
        }
        for name in FEATURE_COMPONENTS {
            match app.components.resolve_as::<Feature>(name) {
                Ok(feature) => println!("  [{name}] {}", feature.0),
                Err(_) => println!("  [{name}] not created"),
            }
        }

        println!("\nCondition evaluation report:");
        for entry in app.components.condition_report() {
            let verdict = match (&entry.outcome, entry.overridden) {
                (_, true) => "overridden by user factory".to_string(),
                (Some(outcome), false) => outcome.to_string(),
                (None, false) => "not evaluated".to_string(),
            };
            println!(
                "  {}[{}] {} -> {}",
                entry.component, entry.index, entry.condition, verdict
            );
        }
    }

    println!("\nDemo completed!");
    Ok(())
}
