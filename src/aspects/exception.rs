//! Failure reporting: one log line and one error counter per failed call

use super::EXCEPTION_ORDER;
use crate::error::{WeaverResult, classify_error, error_code};
use crate::intercept::{AdviceId, InterceptionRegistry};
use crate::metrics::METRICS;
use tracing::error;

pub fn install(registry: &InterceptionRegistry, rule: &str) -> WeaverResult<AdviceId> {
    registry.after_failure(rule, EXCEPTION_ORDER, "exception.report", |jp, err| {
        let error_type = classify_error(err);
        error!(
            owner = jp.owner(),
            operation = jp.operation(),
            code = %error_code(err),
            error_type = error_type,
            error = %err,
            "operation failed"
        );
        METRICS.record_error(error_type, jp.owner());
        None
    })
}
