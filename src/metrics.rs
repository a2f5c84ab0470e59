/// Prometheus metrics for interception, the HTTP surface and demo business events
///
/// Counters are registered without the `_total` suffix; the text encoder
/// appends it.
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

/// Labels for intercepted calls
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct InvocationLabels {
    /// Owner type, e.g. "OrderService"
    pub owner: String,
    pub operation: String,
    /// "success" or "error"
    pub status: String,
}

/// Labels keyed by the `Owner.operation` id
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error type classification
    pub error_type: String,
    /// Owner type the failure surfaced from
    pub service: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    /// Matched route template, e.g. "/api/users/{id}"
    pub route: String,
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabels {
    pub route: String,
}

/// Central metrics collector with Prometheus registry
pub struct MetricsCollector {
    registry: RwLock<Registry>,

    // Interception
    pub invocations: Family<InvocationLabels, Counter>,
    pub invocation_duration_seconds: Family<OperationLabels, Histogram>,
    pub retry_attempts: Family<OperationLabels, Counter>,
    pub errors: Family<ErrorLabels, Counter>,
    pub components_realized: Gauge,

    // HTTP surface
    pub http_requests: Family<HttpLabels, Counter>,
    pub http_request_duration_seconds: Family<RouteLabels, Histogram>,

    // Business events from the demo services
    pub user_logins: Counter,
    pub user_registrations: Counter,
    pub orders_created: Counter,
    pub users_active: Gauge,
    pub orders_pending: Gauge,
    pub order_amount: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with all metrics registered
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let invocations = Family::<InvocationLabels, Counter>::default();
        registry.register(
            "weaver_invocations",
            "Intercepted calls by owner, operation and status",
            invocations.clone(),
        );

        let invocation_duration_seconds =
            Family::<OperationLabels, Histogram>::new_with_constructor(|| {
                // 1ms .. ~10s
                Histogram::new(exponential_buckets(0.001, 2.5, 11))
            });
        registry.register(
            "weaver_invocation_duration_seconds",
            "Wall-clock time of timed intercepted calls",
            invocation_duration_seconds.clone(),
        );

        let retry_attempts = Family::<OperationLabels, Counter>::default();
        registry.register(
            "weaver_retry_attempts",
            "Attempts made by retry advice, first attempt included",
            retry_attempts.clone(),
        );

        let errors = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "weaver_errors",
            "Failures reported by the exception aspect",
            errors.clone(),
        );

        let components_realized = Gauge::default();
        registry.register(
            "weaver_components_realized",
            "Components created by the component registry",
            components_realized.clone(),
        );

        let http_requests = Family::<HttpLabels, Counter>::default();
        registry.register(
            "weaver_http_requests",
            "HTTP requests by method, route and status",
            http_requests.clone(),
        );

        let http_request_duration_seconds =
            Family::<RouteLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.0005, 2.5, 10))
            });
        registry.register(
            "weaver_http_request_duration_seconds",
            "HTTP request latency in seconds",
            http_request_duration_seconds.clone(),
        );

        let user_logins = Counter::default();
        registry.register(
            "weaver_user_logins",
            "Total number of user logins",
            user_logins.clone(),
        );

        let user_registrations = Counter::default();
        registry.register(
            "weaver_user_registrations",
            "Total number of user registrations",
            user_registrations.clone(),
        );

        let orders_created = Counter::default();
        registry.register(
            "weaver_orders_created",
            "Total number of orders created",
            orders_created.clone(),
        );

        let users_active = Gauge::default();
        registry.register(
            "weaver_users_active",
            "Number of currently active users",
            users_active.clone(),
        );

        let orders_pending = Gauge::default();
        registry.register(
            "weaver_orders_pending",
            "Number of pending orders",
            orders_pending.clone(),
        );

        // 1 .. ~100k currency units
        let order_amount = Histogram::new(exponential_buckets(1.0, 4.0, 9));
        registry.register(
            "weaver_order_amount",
            "Distribution of order amounts",
            order_amount.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            invocations,
            invocation_duration_seconds,
            retry_attempts,
            errors,
            components_realized,
            http_requests,
            http_request_duration_seconds,
            user_logins,
            user_registrations,
            orders_created,
            users_active,
            orders_pending,
            order_amount,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(err) = encode(&mut buffer, &registry) {
            tracing::error!(error = %err, "failed to encode metrics");
        }
        buffer
    }

    /// Record one intercepted call
    pub fn record_invocation(&self, owner: &str, operation: &str, success: bool) {
        self.invocations
            .get_or_create(&InvocationLabels {
                owner: owner.to_string(),
                operation: operation.to_string(),
                status: if success { "success" } else { "error" }.to_string(),
            })
            .inc();
    }

    pub fn record_invocation_duration(&self, operation: &str, duration: Duration) {
        self.invocation_duration_seconds
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn record_retry_attempt(&self, operation: &str) {
        self.retry_attempts
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .inc();
    }

    pub fn record_error(&self, error_type: &str, service: &str) {
        self.errors
            .get_or_create(&ErrorLabels {
                error_type: error_type.to_string(),
                service: service.to_string(),
            })
            .inc();
    }

    pub fn update_components_realized(&self, count: usize) {
        self.components_realized.set(count as i64);
    }

    pub fn record_http_request(&self, method: &str, route: &str, status: u16, duration: Duration) {
        self.http_requests
            .get_or_create(&HttpLabels {
                method: method.to_string(),
                route: route.to_string(),
                status: status.to_string(),
            })
            .inc();

        self.http_request_duration_seconds
            .get_or_create(&RouteLabels {
                route: route.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn record_user_login(&self) {
        self.user_logins.inc();
        self.users_active.inc();
    }

    pub fn record_user_logout(&self) {
        self.users_active.dec();
    }

    pub fn record_user_registration(&self) {
        self.user_registrations.inc();
    }

    pub fn record_order_created(&self) {
        self.orders_created.inc();
        self.orders_pending.inc();
    }

    pub fn record_order_amount(&self, amount: f64) {
        self.order_amount.observe(amount);
    }

    pub fn record_order_completed(&self) {
        self.orders_pending.dec();
    }

    /// A payment settled an order
    pub fn record_order_paid(&self, amount: f64) {
        self.record_order_completed();
        self.record_order_amount(amount);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII timer for one intercepted call
///
/// Records the elapsed time into `weaver_invocation_duration_seconds` when
/// finished or dropped, whichever comes first.
pub struct InvocationTimer {
    operation: String,
    start: Instant,
    completed: bool,
}

impl InvocationTimer {
    pub fn start(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
            completed: false,
        }
    }

    /// Stop the timer and return the measured duration
    pub fn finish(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        METRICS.record_invocation_duration(&self.operation, elapsed);
        self.completed = true;
        elapsed
    }
}

impl Drop for InvocationTimer {
    fn drop(&mut self) {
        if !self.completed {
            METRICS.record_invocation_duration(&self.operation, self.start.elapsed());
        }
    }
}
