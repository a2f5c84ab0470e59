//! Business activity behind `/api/actuator-demo`
//!
//! Sessions and pending orders are counted per application so responses can
//! report exact figures; every change is mirrored into the business metrics.

use crate::error::{FieldError, WeaverError, WeaverResult};
use crate::metrics::METRICS;
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

pub const DEFAULT_REGISTRATION_SOURCE: &str = "web";
const ERROR_SERVICE: &str = "ActivityService";

/// Response for every state-changing activity call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityReport {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_users: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_orders: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl ActivityReport {
    fn success(message: String) -> Self {
        Self {
            status: "success".to_string(),
            message: Some(message),
            active_users: None,
            pending_orders: None,
            amount: None,
            error_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub active_users: usize,
    pub pending_orders: u64,
    pub message: String,
}

#[derive(Default)]
pub struct ActivityService {
    sessions: Mutex<IndexSet<String>>,
    pending_orders: AtomicU64,
}

impl ActivityService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session; logging in twice keeps a single session
    pub fn login(&self, username: &str) -> WeaverResult<ActivityReport> {
        let username = required("username", "Username", username)?;
        if self.sessions.lock().insert(username.to_string()) {
            METRICS.record_user_login();
        }
        info!(username, "user logged in");
        Ok(ActivityReport {
            active_users: Some(self.active_users()),
            ..ActivityReport::success(format!("User {} logged in", username))
        })
    }

    pub fn logout(&self, username: &str) -> WeaverResult<ActivityReport> {
        let username = required("username", "Username", username)?;
        if !self.sessions.lock().shift_remove(username) {
            return Err(WeaverError::not_found("Session", "username", username));
        }
        METRICS.record_user_logout();
        info!(username, "user logged out");
        Ok(ActivityReport {
            active_users: Some(self.active_users()),
            ..ActivityReport::success(format!("User {} logged out", username))
        })
    }

    pub fn register(&self, username: &str, source: Option<&str>) -> WeaverResult<ActivityReport> {
        let username = required("username", "Username", username)?;
        let source = source
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_REGISTRATION_SOURCE);
        METRICS.record_user_registration();
        info!(username, source, "user registered");
        Ok(ActivityReport::success(format!(
            "User {} registered from {}",
            username, source
        )))
    }

    pub fn create_order(&self, product_type: &str, amount: f64) -> WeaverResult<ActivityReport> {
        let mut fields = Vec::new();
        if product_type.trim().is_empty() {
            fields.push(FieldError {
                field: "productType".to_string(),
                message: "Product type is required".to_string(),
            });
        }
        if !amount.is_finite() || amount < 0.0 {
            fields.push(FieldError {
                field: "amount".to_string(),
                message: "Amount must be a non-negative number".to_string(),
            });
        }
        if !fields.is_empty() {
            return Err(WeaverError::Validation { fields });
        }

        let product_type = product_type.trim();
        METRICS.record_order_created();
        METRICS.record_order_amount(amount);
        let pending = self.pending_orders.fetch_add(1, Ordering::SeqCst) + 1;
        info!(product_type, amount, pending, "order created");
        Ok(ActivityReport {
            pending_orders: Some(pending),
            amount: Some(amount),
            ..ActivityReport::success(format!("Order created for {}", product_type))
        })
    }

    /// Settle one pending order; fails when nothing is pending
    pub fn complete_order(&self, order_id: &str) -> WeaverResult<ActivityReport> {
        let order_id = required("orderId", "Order id", order_id)?;
        let previous = self
            .pending_orders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map_err(|_| WeaverError::conflict(format!("no pending order to complete for {}", order_id)))?;
        METRICS.record_order_completed();
        info!(order_id, pending = previous - 1, "order completed");
        Ok(ActivityReport {
            pending_orders: Some(previous - 1),
            ..ActivityReport::success(format!("Order {} completed", order_id))
        })
    }

    pub fn record_error(&self, error_type: &str) -> WeaverResult<ActivityReport> {
        let error_type = required("type", "Error type", error_type)?;
        METRICS.record_error(error_type, ERROR_SERVICE);
        warn!(error_type, "error recorded");
        Ok(ActivityReport {
            status: "error_recorded".to_string(),
            message: None,
            active_users: None,
            pending_orders: None,
            amount: None,
            error_type: Some(error_type.to_string()),
        })
    }

    pub fn summary(&self) -> ActivitySummary {
        ActivitySummary {
            active_users: self.active_users(),
            pending_orders: self.pending_orders(),
            message: "Check /actuator/metrics for detailed metrics".to_string(),
        }
    }

    pub fn active_users(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn pending_orders(&self) -> u64 {
        self.pending_orders.load(Ordering::SeqCst)
    }
}

fn required<'a>(field: &str, label: &str, value: &'a str) -> WeaverResult<&'a str> {
    match value.trim() {
        "" => Err(WeaverError::validation(field, format!("{} is required", label))),
        trimmed => Ok(trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use assert_matches::assert_matches;

    #[test]
    fn sessions_are_counted_once_per_user() {
        let activity = ActivityService::new();
        activity.login("john").unwrap();
        let report = activity.login("john").unwrap();
        assert_eq!(report.active_users, Some(1));
        assert_eq!(report.message.as_deref(), Some("User john logged in"));

        activity.login("jane").unwrap();
        let report = activity.logout("john").unwrap();
        assert_eq!(report.active_users, Some(1));

        assert_matches!(activity.logout("john"), Err(WeaverError::NotFound { .. }));
        assert_eq!(activity.login("  ").unwrap_err().code(), ErrorCode::Validation);
    }

    #[test]
    fn registration_defaults_to_web() {
        let activity = ActivityService::new();
        let report = activity.register("john", None).unwrap();
        assert_eq!(report.message.as_deref(), Some("User john registered from web"));
        let report = activity.register("john", Some("mobile")).unwrap();
        assert_eq!(report.message.as_deref(), Some("User john registered from mobile"));
    }

    #[test]
    fn orders_move_through_pending() {
        let activity = ActivityService::new();
        let report = activity.create_order("electronics", 99.99).unwrap();
        assert_eq!(report.pending_orders, Some(1));
        assert_eq!(report.amount, Some(99.99));
        activity.create_order("books", 12.0).unwrap();

        let report = activity.complete_order("123").unwrap();
        assert_eq!(report.pending_orders, Some(1));
        assert_eq!(report.message.as_deref(), Some("Order 123 completed"));
        activity.complete_order("124").unwrap();

        let err = activity.complete_order("125").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert_eq!(activity.pending_orders(), 0);
    }

    #[test]
    fn invalid_orders_report_every_field() {
        let activity = ActivityService::new();
        let err = activity.create_order(" ", f64::NAN).unwrap_err();
        let fields: Vec<_> = err.field_errors().iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["productType", "amount"]);
        assert_eq!(activity.pending_orders(), 0);
    }

    #[test]
    fn errors_and_summary() {
        let activity = ActivityService::new();
        let report = activity.record_error("validation").unwrap();
        assert_eq!(report.status, "error_recorded");
        assert_eq!(report.error_type.as_deref(), Some("validation"));
        assert!(report.message.is_none());

        activity.login("john").unwrap();
        activity.create_order("electronics", 5.0).unwrap();
        assert_eq!(
            activity.summary(),
            ActivitySummary {
                active_users: 1,
                pending_orders: 1,
                message: "Check /actuator/metrics for detailed metrics".to_string(),
            }
        );
    }
}
