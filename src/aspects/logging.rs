//! Call logging and timing for service operations

use super::LOGGING_ORDER;
use crate::error::WeaverResult;
use crate::intercept::{AdviceId, InterceptionRegistry};
use crate::metrics::InvocationTimer;
use tracing::{debug, info, warn};

/// Register the four log advices and the timing `Around` on `rule`
pub fn install(registry: &InterceptionRegistry, rule: &str) -> WeaverResult<Vec<AdviceId>> {
    let before = registry.before(rule, LOGGING_ORDER, "log.before", |jp| {
        info!(call = %jp.target(), args = ?jp.args(), "calling");
        Ok(())
    })?;

    let after_success = registry.after_success(rule, LOGGING_ORDER, "log.returned", |jp, result| {
        debug!(call = %jp.target(), result = %result, "returned");
    })?;

    let after_failure = registry.after_failure(rule, LOGGING_ORDER, "log.threw", |jp, err| {
        warn!(call = %jp.target(), error = %err, "threw");
        None
    })?;

    let after = registry.after(rule, LOGGING_ORDER, "log.after", |jp, outcome| {
        debug!(call = %jp.target(), ok = outcome.is_ok(), "completed");
    })?;

    let timing = registry.around(rule, LOGGING_ORDER, "log.timing", |jp, proceed| {
        let timer = InvocationTimer::start(jp.id());
        let result = proceed.call();
        let elapsed = timer.finish();
        match &result {
            Ok(_) => info!(
                call = %jp.target(),
                elapsed_ms = elapsed.as_millis() as u64,
                "executed"
            ),
            Err(_) => warn!(
                call = %jp.target(),
                elapsed_ms = elapsed.as_millis() as u64,
                "failed"
            ),
        }
        result
    })?;

    Ok(vec![before, after_success, after_failure, after, timing])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::{AdviceKind, Target};
    use crate::metrics::METRICS;
    use anyhow::anyhow;
    use serde_json::json;

    #[test]
    fn applies_only_to_matching_owners() {
        let registry = InterceptionRegistry::new();
        let ids = install(&registry, "within(*Service)").unwrap();
        assert_eq!(ids.len(), 5);

        let kinds: Vec<_> = registry
            .advice_for(&Target::new("OrderService", "createOrder"))
            .into_iter()
            .map(|d| d.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                AdviceKind::Before,
                AdviceKind::AfterSuccess,
                AdviceKind::AfterFailure,
                AdviceKind::After,
                AdviceKind::Around,
            ]
        );
        assert!(registry.advice_for(&Target::new("UserRepository", "save")).is_empty());
    }

    #[test]
    fn passes_results_and_errors_through() {
        let registry = InterceptionRegistry::new();
        install(&registry, "within(*Service)").unwrap();

        let target = Target::new("TimedService", "work");
        let ok = registry.invoke(&target, vec![json!(1)], |_| Ok(json!("done")));
        assert_eq!(ok.unwrap(), json!("done"));

        let err = registry.invoke(&target, vec![], |_| Err(anyhow!("broken")));
        assert_eq!(err.unwrap_err().to_string(), "broken");

        assert!(METRICS.encode().contains(r#"operation="TimedService.work""#));
    }
}
