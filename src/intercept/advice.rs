//! Join points, targets and the advice callables that run around them

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use strum::{Display, EnumString};

/// Final result of an intercepted call
pub type Outcome = Result<Value>;

/// A named marker on an operation or owner type, with optional attributes
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    name: String,
    attributes: Map<String, Value>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Map::new(),
        }
    }

    /// Attach an attribute, e.g. `Tag::new("Retry").with("max_attempts", 5)`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        self.attr(key).and_then(Value::as_u64)
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(Value::as_str)
    }

    /// String list attribute; a single string is treated as a one-element list
    pub fn attr_strings(&self, key: &str) -> Vec<String> {
        match self.attr(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }
}

/// Descriptor of an interceptable operation: `Owner.operation` plus tags
#[derive(Debug, Clone)]
pub struct Target {
    owner: String,
    operation: String,
    tags: SmallVec<[Tag; 2]>,
    owner_tags: SmallVec<[Tag; 2]>,
}

impl Target {
    pub fn new(owner: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            operation: operation.into(),
            tags: SmallVec::new(),
            owner_tags: SmallVec::new(),
        }
    }

    /// Tag the operation itself (the `@annotation` side)
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Shorthand for an attribute-less operation tag
    pub fn tagged(self, name: &str) -> Self {
        self.with_tag(Tag::new(name))
    }

    /// Tag the owning type (the `@within` side)
    pub fn with_owner_tag(mut self, tag: Tag) -> Self {
        self.owner_tags.push(tag);
        self
    }

    pub fn owner_tagged(self, name: &str) -> Self {
        self.with_owner_tag(Tag::new(name))
    }

    /// `Owner.operation`
    pub fn id(&self) -> String {
        format!("{}.{}", self.owner, self.operation)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tag(name).is_some()
    }

    pub fn has_owner_tag(&self, name: &str) -> bool {
        self.owner_tags.iter().any(|t| t.name == name)
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.operation)
    }
}

/// What advice sees of the call in progress
#[derive(Debug, Clone, Copy)]
pub struct JoinPoint<'a> {
    target: &'a Target,
    args: &'a [Value],
}

impl<'a> JoinPoint<'a> {
    pub fn new(target: &'a Target, args: &'a [Value]) -> Self {
        Self { target, args }
    }

    pub fn target(&self) -> &'a Target {
        self.target
    }

    pub fn id(&self) -> String {
        self.target.id()
    }

    pub fn operation(&self) -> &'a str {
        self.target.operation()
    }

    pub fn owner(&self) -> &'a str {
        self.target.owner()
    }

    pub fn args(&self) -> &'a [Value] {
        self.args
    }

    pub fn arg(&self, index: usize) -> Option<&'a Value> {
        self.args.get(index)
    }

    pub fn tag(&self, name: &str) -> Option<&'a Tag> {
        self.target.tag(name)
    }
}

/// Inner continuation handed to `Around` advice
///
/// Calling it runs the remaining `Around` layers and then the body. It may be
/// called any number of times; not calling it short-circuits the body.
#[derive(Clone, Copy)]
pub struct Proceed<'a> {
    inner: &'a dyn Fn() -> Outcome,
}

impl<'a> Proceed<'a> {
    pub fn new(inner: &'a dyn Fn() -> Outcome) -> Self {
        Self { inner }
    }

    pub fn call(&self) -> Outcome {
        (self.inner)()
    }
}

/// Dispatch slot of an advice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdviceKind {
    Before,
    After,
    AfterSuccess,
    AfterFailure,
    Around,
}

pub type BeforeFn = dyn Fn(&JoinPoint<'_>) -> Result<()> + Send + Sync;
pub type AfterFn = dyn Fn(&JoinPoint<'_>, &Outcome) + Send + Sync;
pub type AfterSuccessFn = dyn Fn(&JoinPoint<'_>, &Value) + Send + Sync;
pub type AfterFailureFn = dyn Fn(&JoinPoint<'_>, &anyhow::Error) -> Option<Outcome> + Send + Sync;
pub type AroundFn = dyn Fn(&JoinPoint<'_>, Proceed<'_>) -> Outcome + Send + Sync;

#[derive(Clone)]
pub(crate) enum AdviceFn {
    Before(Arc<BeforeFn>),
    After(Arc<AfterFn>),
    AfterSuccess(Arc<AfterSuccessFn>),
    AfterFailure(Arc<AfterFailureFn>),
    Around(Arc<AroundFn>),
}

/// A named advice callable
#[derive(Clone)]
pub struct Advice {
    name: String,
    pub(crate) func: AdviceFn,
}

impl Advice {
    /// Runs before the call; an error aborts the call
    pub fn before<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&JoinPoint<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: AdviceFn::Before(Arc::new(f)),
        }
    }

    /// Runs after every call, whatever the outcome
    pub fn after<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&JoinPoint<'_>, &Outcome) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: AdviceFn::After(Arc::new(f)),
        }
    }

    /// Runs after the body completed successfully
    pub fn after_success<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&JoinPoint<'_>, &Value) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: AdviceFn::AfterSuccess(Arc::new(f)),
        }
    }

    /// Runs after the body failed; `Some(outcome)` replaces the failure
    pub fn after_failure<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&JoinPoint<'_>, &anyhow::Error) -> Option<Outcome> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: AdviceFn::AfterFailure(Arc::new(f)),
        }
    }

    /// Wraps the body; must call `proceed` to run it
    pub fn around<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&JoinPoint<'_>, Proceed<'_>) -> Outcome + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: AdviceFn::Around(Arc::new(f)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AdviceKind {
        match self.func {
            AdviceFn::Before(_) => AdviceKind::Before,
            AdviceFn::After(_) => AdviceKind::After,
            AdviceFn::AfterSuccess(_) => AdviceKind::AfterSuccess,
            AdviceFn::AfterFailure(_) => AdviceKind::AfterFailure,
            AdviceFn::Around(_) => AdviceKind::Around,
        }
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advice")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn target_id_and_tags() {
        let target = Target::new("OrderService", "createOrder")
            .with_tag(Tag::new("Auditable").with("action", "CREATE_ORDER"))
            .tagged("Secured")
            .owner_tagged("Service");

        assert_eq!(target.id(), "OrderService.createOrder");
        assert!(target.has_tag("Secured"));
        assert!(target.has_owner_tag("Service"));
        assert!(!target.has_tag("Retry"));
        assert_eq!(
            target.tag("Auditable").and_then(|t| t.attr_str("action")),
            Some("CREATE_ORDER")
        );
    }

    #[test]
    fn tag_string_lists() {
        let tag = Tag::new("Secured").with("roles", json!(["USER", "ADMIN"]));
        assert_eq!(tag.attr_strings("roles"), vec!["USER", "ADMIN"]);

        let single = Tag::new("Secured").with("roles", "ADMIN");
        assert_eq!(single.attr_strings("roles"), vec!["ADMIN"]);

        assert!(Tag::new("Secured").attr_strings("roles").is_empty());
    }

    #[test]
    fn advice_kind_names() {
        assert_eq!(AdviceKind::AfterSuccess.to_string(), "after_success");
        assert_eq!(
            "after_failure".parse::<AdviceKind>().ok(),
            Some(AdviceKind::AfterFailure)
        );
        let advice = Advice::around("timing", |_, proceed| proceed.call());
        assert_eq!(advice.kind(), AdviceKind::Around);
        assert_eq!(advice.name(), "timing");
    }
}
