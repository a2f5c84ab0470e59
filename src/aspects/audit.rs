//! Audit trail entries for operations tagged `@Auditable(action = ...)`

use super::AUDIT_ORDER;
use crate::aspects::security::SecurityContext;
use crate::audit::{AuditEvent, AuditTrail};
use crate::error::WeaverResult;
use crate::intercept::{AdviceId, InterceptionRegistry};
use std::sync::Arc;

pub const AUDITABLE_TAG: &str = "Auditable";

pub fn install(
    registry: &InterceptionRegistry,
    trail: Arc<AuditTrail>,
    security: Arc<SecurityContext>,
) -> WeaverResult<AdviceId> {
    registry.after_success(
        &format!("@{}", AUDITABLE_TAG),
        AUDIT_ORDER,
        "audit.record",
        move |jp, result| {
            let action = jp
                .tag(AUDITABLE_TAG)
                .and_then(|t| t.attr_str("action"))
                .filter(|a| !a.is_empty())
                .unwrap_or(jp.operation());

            let mut event = AuditEvent::new(action, jp.id())
                .with_args(jp.args())
                .with_result(result.clone());
            if let Some(name) = security.principal_name() {
                event = event.with_principal(name);
            }
            trail.log(event);
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspects::security::Principal;
    use crate::intercept::{Tag, Target};
    use anyhow::anyhow;
    use serde_json::json;

    fn setup() -> (InterceptionRegistry, Arc<AuditTrail>) {
        let registry = InterceptionRegistry::new();
        let trail = Arc::new(AuditTrail::in_memory());
        let security = Arc::new(SecurityContext::authenticated(Principal::new(
            "john.doe",
            ["USER"],
        )));
        install(&registry, Arc::clone(&trail), security).unwrap();
        (registry, trail)
    }

    #[test]
    fn records_action_principal_args_and_result() {
        let (registry, trail) = setup();
        let target = Target::new("OrderService", "createOrder")
            .with_tag(Tag::new(AUDITABLE_TAG).with("action", "CREATE_ORDER"));

        registry
            .invoke(&target, vec![json!("Laptop"), json!(2)], |_| Ok(json!("ORD-1")))
            .unwrap();

        let events = trail.recent(1);
        let event = &events[0];
        assert_eq!(event.action, "CREATE_ORDER");
        assert_eq!(event.target, "OrderService.createOrder");
        assert_eq!(event.principal.as_deref(), Some("john.doe"));
        assert_eq!(event.args, vec![json!("Laptop"), json!(2)]);
        assert_eq!(event.result, json!("ORD-1"));
    }

    #[test]
    fn action_defaults_to_operation_and_failures_are_skipped() {
        let (registry, trail) = setup();
        let target = Target::new("OrderService", "cancelOrder").tagged(AUDITABLE_TAG);

        registry.invoke(&target, vec![], |_| Ok(json!(true))).unwrap();
        let _ = registry.invoke(&target, vec![], |_| Err(anyhow!("already shipped")));

        assert_eq!(trail.len(), 1);
        assert_eq!(trail.recent(1)[0].action, "cancelOrder");
    }
}
