//! Order and payment services whose every call runs through the interception registry

use crate::aspects::security::SECURED_TAG;
use crate::aspects::audit::AUDITABLE_TAG;
use crate::intercept::{InterceptionRegistry, RETRY_TAG, Tag, Target};
use crate::metrics::METRICS;
use anyhow::{Result, anyhow};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::info;

pub const ORDER_SERVICE: &str = "OrderService";
pub const PAYMENT_SERVICE: &str = "PaymentService";

/// Failures before `process_payment` succeeds
const GATEWAY_FAILURES: u32 = 2;
const PAYMENT_RETRY_ATTEMPTS: u32 = 3;

fn into_string(value: Value) -> Result<String> {
    serde_json::from_value(value).map_err(|e| anyhow!("unexpected return value: {e}"))
}

pub struct OrderService {
    interceptor: Arc<InterceptionRegistry>,
    payment_attempts: AtomicU32,
    retry_delay_ms: u64,
}

impl OrderService {
    pub fn new(interceptor: Arc<InterceptionRegistry>) -> Self {
        Self {
            interceptor,
            payment_attempts: AtomicU32::new(0),
            retry_delay_ms: 500,
        }
    }

    /// Delay between payment retries
    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn create_order(&self, product_id: &str, quantity: u32) -> Result<String> {
        let target = Target::new(ORDER_SERVICE, "createOrder")
            .with_tag(Tag::new(AUDITABLE_TAG).with("action", "CREATE_ORDER"))
            .with_tag(Tag::new(SECURED_TAG).with("roles", json!(["USER", "ADMIN"])));

        let value = self.interceptor.invoke(
            &target,
            vec![json!(product_id), json!(quantity)],
            |_| {
                let order_id = format!("ORD-{}", Utc::now().timestamp_millis());
                info!(product_id, quantity, order_id = %order_id, "order created");
                METRICS.record_order_created();
                Ok(json!(order_id))
            },
        )?;
        into_string(value)
    }

    pub fn cancel_order(&self, order_id: &str) -> Result<()> {
        let target = Target::new(ORDER_SERVICE, "cancelOrder")
            .with_tag(Tag::new(SECURED_TAG).with("roles", json!(["ADMIN"])));
        self.interceptor.invoke(&target, vec![json!(order_id)], |_| {
            info!(order_id, "order cancelled");
            Ok(Value::Null)
        })?;
        Ok(())
    }

    pub fn order_status(&self, order_id: &str) -> Result<String> {
        let target = Target::new(ORDER_SERVICE, "getOrderStatus");
        let value = self
            .interceptor
            .invoke(&target, vec![json!(order_id)], |_| Ok(json!("PROCESSING")))?;
        into_string(value)
    }

    /// Fails with a gateway timeout twice, then succeeds; `@Retry` absorbs the failures
    pub fn process_payment(&self, order_id: &str) -> Result<()> {
        let target = Target::new(ORDER_SERVICE, "processPayment").with_tag(
            Tag::new(RETRY_TAG)
                .with("max_attempts", PAYMENT_RETRY_ATTEMPTS)
                .with("delay_ms", self.retry_delay_ms),
        );
        self.interceptor.invoke(&target, vec![json!(order_id)], |_| {
            let attempt = self.payment_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            info!(order_id, attempt, "processing payment");
            if attempt <= GATEWAY_FAILURES {
                return Err(anyhow!("Payment gateway timeout"));
            }
            self.payment_attempts.store(0, Ordering::SeqCst);
            Ok(json!("PAID"))
        })?;
        Ok(())
    }

    pub fn failing_method(&self) -> Result<()> {
        let target = Target::new(ORDER_SERVICE, "failingMethod");
        self.interceptor
            .invoke(&target, vec![], |_| Err(anyhow!("Something went wrong!")))?;
        Ok(())
    }
}

pub struct PaymentService {
    interceptor: Arc<InterceptionRegistry>,
}

impl PaymentService {
    pub fn new(interceptor: Arc<InterceptionRegistry>) -> Self {
        Self { interceptor }
    }

    pub fn process_payment(&self, order_id: &str, amount: f64) -> Result<()> {
        let target = Target::new(PAYMENT_SERVICE, "processPayment")
            .with_tag(Tag::new(AUDITABLE_TAG).with("action", "PROCESS_PAYMENT"));
        self.interceptor
            .invoke(&target, vec![json!(order_id), json!(amount)], |_| {
                info!(order_id, amount, "payment completed");
                METRICS.record_order_paid(amount);
                Ok(Value::Null)
            })?;
        Ok(())
    }

    pub fn payment_status(&self, payment_id: &str) -> Result<String> {
        let target = Target::new(PAYMENT_SERVICE, "getPaymentStatus");
        let value = self
            .interceptor
            .invoke(&target, vec![json!(payment_id)], |_| Ok(json!("COMPLETED")))?;
        into_string(value)
    }
}
