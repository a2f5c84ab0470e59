//! Role check for operations tagged `@Secured(roles = ...)`

use super::SECURITY_ORDER;
use crate::error::{WeaverError, WeaverResult};
use crate::intercept::{AdviceId, InterceptionRegistry, JoinPoint};
use crate::metrics::METRICS;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const SECURED_TAG: &str = "Secured";

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new<I, S>(name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// `ROLE_ADMIN` and `ADMIN` name the same role
    pub fn has_any_role(&self, required: &[String]) -> bool {
        self.roles
            .iter()
            .any(|held| required.iter().any(|r| role_name(r) == role_name(held)))
    }
}

fn role_name(role: &str) -> &str {
    role.strip_prefix("ROLE_").unwrap_or(role)
}

/// Holder of the current principal, shared by the security and audit aspects
#[derive(Debug, Default)]
pub struct SecurityContext {
    current: RwLock<Option<Principal>>,
}

impl SecurityContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authenticated(principal: Principal) -> Self {
        let context = Self::new();
        context.authenticate(principal);
        context
    }

    /// Replace the current principal; a replaced one counts as logged out
    pub fn authenticate(&self, principal: Principal) {
        debug!(principal = %principal.name, roles = ?principal.roles, "principal authenticated");
        if self.current.write().replace(principal).is_some() {
            METRICS.record_user_logout();
        }
        METRICS.record_user_login();
    }

    pub fn clear(&self) {
        if self.current.write().take().is_some() {
            METRICS.record_user_logout();
        }
    }

    pub fn current(&self) -> Option<Principal> {
        self.current.read().clone()
    }

    pub fn principal_name(&self) -> Option<String> {
        self.current.read().as_ref().map(|p| p.name.clone())
    }
}

fn check(context: &SecurityContext, jp: &JoinPoint<'_>) -> anyhow::Result<()> {
    let required = jp
        .tag(SECURED_TAG)
        .map(|tag| tag.attr_strings("roles"))
        .unwrap_or_default();
    let principal = context.current();

    let granted = principal
        .as_ref()
        .is_some_and(|p| p.has_any_role(&required));

    if granted {
        debug!(operation = %jp.target(), required = ?required, "access granted");
        return Ok(());
    }

    warn!(
        operation = %jp.target(),
        required = ?required,
        principal = ?principal.map(|p| p.name),
        "access denied"
    );
    Err(WeaverError::AccessDenied {
        operation: jp.id(),
        required,
    }
    .into())
}

/// Register the `@Secured` check
pub fn install(registry: &InterceptionRegistry, context: Arc<SecurityContext>) -> WeaverResult<AdviceId> {
    registry.before(
        &format!("@{}", SECURED_TAG),
        SECURITY_ORDER,
        "security.check",
        move |jp| check(&context, jp),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::{Tag, Target};
    use assert_matches::assert_matches;
    use serde_json::{Value, json};

    fn admin_only() -> Target {
        Target::new("UserService", "deleteUser")
            .with_tag(Tag::new(SECURED_TAG).with("roles", json!(["ADMIN"])))
    }

    fn setup(principal: Option<Principal>) -> InterceptionRegistry {
        let registry = InterceptionRegistry::new();
        let context = Arc::new(SecurityContext::new());
        if let Some(p) = principal {
            context.authenticate(p);
        }
        install(&registry, context).unwrap();
        registry
    }

    #[test]
    fn grants_matching_role() {
        let registry = setup(Some(Principal::new("john.doe", ["USER", "ROLE_ADMIN"])));
        let result = registry.invoke(&admin_only(), vec![], |_| Ok(json!("deleted")));
        assert_eq!(result.unwrap(), json!("deleted"));
    }

    #[test]
    fn denies_missing_role_without_running_body() {
        let registry = setup(Some(Principal::new("jane", ["USER"])));
        let ran = std::cell::Cell::new(false);
        let err = registry
            .invoke(&admin_only(), vec![], |_| {
                ran.set(true);
                Ok(Value::Null)
            })
            .unwrap_err();

        assert!(!ran.get());
        let typed = err.downcast_ref::<WeaverError>().unwrap();
        assert_matches!(typed, WeaverError::AccessDenied { required, .. } if required == &vec!["ADMIN".to_string()]);
    }

    #[test]
    fn denies_anonymous_and_empty_role_lists() {
        let registry = setup(None);
        assert!(registry.invoke(&admin_only(), vec![], |_| Ok(Value::Null)).is_err());

        let registry = setup(Some(Principal::new("root", ["ADMIN"])));
        let no_roles = Target::new("UserService", "purge").tagged(SECURED_TAG);
        assert!(registry.invoke(&no_roles, vec![], |_| Ok(Value::Null)).is_err());
    }
}
