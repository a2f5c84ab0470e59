//! Conditions gating default component factories

use super::environment::Environment;
use serde::Serialize;
use std::fmt;

/// Read view of the component registry available to conditions
pub trait ComponentLookup {
    /// A user factory is registered under `name`
    fn has_user_factory(&self, name: &str) -> bool;

    /// `name` has already been created
    fn is_realized(&self, name: &str) -> bool;

    /// Any factory, user or default, is registered under `name`
    fn is_registered(&self, name: &str) -> bool;

    /// Present for the purpose of `on_component` / `on_missing_component`
    fn contains(&self, name: &str) -> bool {
        self.has_user_factory(name) || self.is_realized(name)
    }
}

/// Result of evaluating a condition, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionOutcome {
    pub matched: bool,
    pub message: String,
}

impl ConditionOutcome {
    pub fn matched(message: impl Into<String>) -> Self {
        Self {
            matched: true,
            message: message.into(),
        }
    }

    pub fn no_match(message: impl Into<String>) -> Self {
        Self {
            matched: false,
            message: message.into(),
        }
    }

    fn from_bool(matched: bool, message: impl Into<String>) -> Self {
        Self {
            matched,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConditionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.matched { "matched" } else { "did not match" };
        write!(f, "{}: {}", verdict, self.message)
    }
}

/// A predicate over the environment and registry state
pub trait Condition: Send + Sync {
    fn evaluate(&self, env: &Environment, components: &dyn ComponentLookup) -> ConditionOutcome;

    /// Short human-readable form for reports
    fn describe(&self) -> String {
        "custom condition".to_string()
    }
}

pub type BoxCondition = Box<dyn Condition>;

impl<F> Condition for F
where
    F: Fn(&Environment, &dyn ComponentLookup) -> bool + Send + Sync,
{
    fn evaluate(&self, env: &Environment, components: &dyn ComponentLookup) -> ConditionOutcome {
        ConditionOutcome::from_bool(self(env, components), "custom condition")
    }
}

/// Combinators available on every condition
pub trait ConditionExt: Condition + Sized + 'static {
    fn boxed(self) -> BoxCondition {
        Box::new(self)
    }

    fn and<C: Condition + 'static>(self, other: C) -> AllOf {
        all(vec![self.boxed(), other.boxed()])
    }

    fn or<C: Condition + 'static>(self, other: C) -> AnyOf {
        any(vec![self.boxed(), other.boxed()])
    }

    fn negate(self) -> Not {
        not(self)
    }
}

impl<C: Condition + Sized + 'static> ConditionExt for C {}

// =============================================================================
// BUILT-INS
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl Condition for Always {
    fn evaluate(&self, _: &Environment, _: &dyn ComponentLookup) -> ConditionOutcome {
        ConditionOutcome::matched("unconditional")
    }

    fn describe(&self) -> String {
        "always".to_string()
    }
}

pub fn always() -> Always {
    Always
}

/// Property check
///
/// Without `having_value`, any value other than `false` (case-insensitive)
/// matches. With it, the value must equal it case-insensitively. A missing
/// property matches only when `match_if_missing` is set.
#[derive(Debug, Clone)]
pub struct OnProperty {
    name: String,
    having_value: Option<String>,
    match_if_missing: bool,
}

impl OnProperty {
    pub fn having_value(mut self, value: impl Into<String>) -> Self {
        self.having_value = Some(value.into());
        self
    }

    pub fn match_if_missing(mut self, matches: bool) -> Self {
        self.match_if_missing = matches;
        self
    }
}

impl Condition for OnProperty {
    fn evaluate(&self, env: &Environment, _: &dyn ComponentLookup) -> ConditionOutcome {
        match env.get(&self.name) {
            None if self.match_if_missing => {
                ConditionOutcome::matched(format!("property '{}' missing, match_if_missing", self.name))
            }
            None => ConditionOutcome::no_match(format!("property '{}' not found", self.name)),
            Some(value) => {
                let matched = match &self.having_value {
                    Some(expected) => value.trim().eq_ignore_ascii_case(expected),
                    None => !value.trim().eq_ignore_ascii_case("false"),
                };
                ConditionOutcome::from_bool(
                    matched,
                    format!("property '{}' is '{}'", self.name, value),
                )
            }
        }
    }

    fn describe(&self) -> String {
        match &self.having_value {
            Some(v) => format!("on_property({} == {})", self.name, v),
            None => format!("on_property({})", self.name),
        }
    }
}

pub fn on_property(name: impl Into<String>) -> OnProperty {
    OnProperty {
        name: name.into(),
        having_value: None,
        match_if_missing: false,
    }
}

/// Matches whenever the property is set, whatever its value
#[derive(Debug, Clone)]
pub struct OnPropertyPresent(String);

impl Condition for OnPropertyPresent {
    fn evaluate(&self, env: &Environment, _: &dyn ComponentLookup) -> ConditionOutcome {
        ConditionOutcome::from_bool(
            env.contains(&self.0),
            format!("property '{}' present: {}", self.0, env.contains(&self.0)),
        )
    }

    fn describe(&self) -> String {
        format!("on_property_present({})", self.0)
    }
}

pub fn on_property_present(name: impl Into<String>) -> OnPropertyPresent {
    OnPropertyPresent(name.into())
}

#[derive(Debug, Clone)]
pub struct OnComponent {
    name: String,
    present: bool,
}

impl Condition for OnComponent {
    fn evaluate(&self, _: &Environment, components: &dyn ComponentLookup) -> ConditionOutcome {
        let found = components.contains(&self.name);
        ConditionOutcome::from_bool(
            found == self.present,
            if found {
                format!("found component '{}'", self.name)
            } else {
                format!("no component '{}'", self.name)
            },
        )
    }

    fn describe(&self) -> String {
        if self.present {
            format!("on_component({})", self.name)
        } else {
            format!("on_missing_component({})", self.name)
        }
    }
}

/// Matches when a user factory for `name` exists or `name` is already realized
pub fn on_component(name: impl Into<String>) -> OnComponent {
    OnComponent {
        name: name.into(),
        present: true,
    }
}

pub fn on_missing_component(name: impl Into<String>) -> OnComponent {
    OnComponent {
        name: name.into(),
        present: false,
    }
}

/// Matches when any of the profiles is active
#[derive(Debug, Clone)]
pub struct OnProfile(Vec<String>);

impl Condition for OnProfile {
    fn evaluate(&self, env: &Environment, _: &dyn ComponentLookup) -> ConditionOutcome {
        match self.0.iter().find(|p| env.is_profile_active(p)) {
            Some(active) => ConditionOutcome::matched(format!("profile '{}' active", active)),
            None => ConditionOutcome::no_match(format!(
                "none of profiles [{}] active",
                self.0.join(", ")
            )),
        }
    }

    fn describe(&self) -> String {
        format!("on_profile({})", self.0.join(" | "))
    }
}

pub fn on_profile<I, S>(profiles: I) -> OnProfile
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    OnProfile(profiles.into_iter().map(Into::into).collect())
}

/// Every condition must match; evaluation stops at the first miss
pub struct AllOf(Vec<BoxCondition>);

impl Condition for AllOf {
    fn evaluate(&self, env: &Environment, components: &dyn ComponentLookup) -> ConditionOutcome {
        let mut messages = Vec::with_capacity(self.0.len());
        for condition in &self.0 {
            let outcome = condition.evaluate(env, components);
            if !outcome.matched {
                return outcome;
            }
            messages.push(outcome.message);
        }
        ConditionOutcome::matched(messages.join("; "))
    }

    fn describe(&self) -> String {
        format!(
            "all({})",
            self.0.iter().map(|c| c.describe()).collect::<Vec<_>>().join(", ")
        )
    }
}

pub fn all(conditions: Vec<BoxCondition>) -> AllOf {
    AllOf(conditions)
}

/// At least one condition must match; evaluation stops at the first hit
pub struct AnyOf(Vec<BoxCondition>);

impl Condition for AnyOf {
    fn evaluate(&self, env: &Environment, components: &dyn ComponentLookup) -> ConditionOutcome {
        let mut messages = Vec::with_capacity(self.0.len());
        for condition in &self.0 {
            let outcome = condition.evaluate(env, components);
            if outcome.matched {
                return outcome;
            }
            messages.push(outcome.message);
        }
        ConditionOutcome::no_match(messages.join("; "))
    }

    fn describe(&self) -> String {
        format!(
            "any({})",
            self.0.iter().map(|c| c.describe()).collect::<Vec<_>>().join(", ")
        )
    }
}

pub fn any(conditions: Vec<BoxCondition>) -> AnyOf {
    AnyOf(conditions)
}

pub struct Not(BoxCondition);

impl Condition for Not {
    fn evaluate(&self, env: &Environment, components: &dyn ComponentLookup) -> ConditionOutcome {
        let inner = self.0.evaluate(env, components);
        ConditionOutcome::from_bool(!inner.matched, format!("not ({})", inner.message))
    }

    fn describe(&self) -> String {
        format!("not({})", self.0.describe())
    }
}

pub fn not<C: Condition + 'static>(condition: C) -> Not {
    Not(Box::new(condition))
}
