//! Condition-gated component registry
//!
//! Each component name has at most one user factory and any number of default
//! factories guarded by conditions. On first `resolve`:
//! - a user factory, if registered, wins and defaults are never evaluated
//! - otherwise defaults are tried in registration order; the first whose
//!   condition matches builds the component
//!
//! Every name is built at most once; later resolves share the same `Arc`.
//! Factories resolve their dependencies through `FactoryContext`, which carries
//! the resolution chain used to detect cycles.

pub mod condition;
pub mod environment;

pub use condition::{
    AllOf, Always, AnyOf, BoxCondition, ComponentLookup, Condition, ConditionExt,
    ConditionOutcome, Not, OnComponent, OnProfile, OnProperty, OnPropertyPresent, all, always,
    any, not, on_component, on_missing_component, on_profile, on_property, on_property_present,
};
pub use environment::Environment;

use crate::error::WeaverError;
use crate::metrics::METRICS;
use anyhow::Result;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A realized component
pub type Component = Arc<dyn Any + Send + Sync>;

type FactoryFn = dyn Fn(&FactoryContext<'_>) -> Result<Component> + Send + Sync;
type DestroyFn = dyn Fn(&Component) -> Result<()> + Send + Sync;

struct DefaultFactory {
    condition: BoxCondition,
    factory: Arc<FactoryFn>,
    last_outcome: Mutex<Option<ConditionOutcome>>,
}

#[derive(Default)]
struct Entry {
    user: RwLock<Option<Arc<FactoryFn>>>,
    defaults: RwLock<Vec<Arc<DefaultFactory>>>,
    instance: OnceCell<Component>,
    destroy_hooks: Mutex<Vec<Arc<DestroyFn>>>,
}

/// One default factory's line in the condition report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionReportEntry {
    pub component: String,
    /// Position among the defaults registered for `component`
    pub index: usize,
    pub condition: String,
    /// `None` when never evaluated
    pub outcome: Option<ConditionOutcome>,
    /// A user factory made this default irrelevant
    pub overridden: bool,
}

/// What a factory sees while building its component
pub struct FactoryContext<'a> {
    registry: &'a ComponentRegistry,
    chain: Vec<String>,
}

impl<'a> FactoryContext<'a> {
    pub fn env(&self) -> &'a Environment {
        &self.registry.env
    }

    /// Resolve a dependency
    pub fn resolve(&self, name: &str) -> Result<Component> {
        self.registry.resolve_in(name, &self.chain)
    }

    pub fn resolve_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        downcast(name, self.resolve(name)?)
    }

    /// Names currently being built, outermost first
    pub fn chain(&self) -> &[String] {
        &self.chain
    }
}

/// Registry of user and default factories for named components
pub struct ComponentRegistry {
    env: Environment,
    entries: RwLock<IndexMap<String, Arc<Entry>>>,
    realized: Mutex<Vec<String>>,
}

impl ComponentRegistry {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            entries: RwLock::new(IndexMap::new()),
            realized: Mutex::new(Vec::new()),
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    fn entry(&self, name: &str) -> Arc<Entry> {
        if let Some(entry) = self.entries.read().get(name) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(name.to_string()).or_default())
    }

    fn existing(&self, name: &str) -> Option<Arc<Entry>> {
        self.entries.read().get(name).cloned()
    }

    /// Register a default factory guarded by `condition`
    ///
    /// The condition is evaluated lazily on the first `resolve(name)`.
    pub fn register_factory<T, C, F>(&self, name: &str, condition: C, factory: F)
    where
        T: Any + Send + Sync,
        C: Condition + 'static,
        F: Fn(&FactoryContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        debug!(component = name, condition = %condition.describe(), "registering default factory");
        let entry = self.entry(name);
        entry.defaults.write().push(Arc::new(DefaultFactory {
            condition: Box::new(condition),
            factory: erase(factory),
            last_outcome: Mutex::new(None),
        }));
    }

    /// Register a user factory; the first one for a name wins
    pub fn register_user<T, F>(&self, name: &str, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&FactoryContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        let entry = self.entry(name);
        if entry.instance.get().is_some() {
            warn!(component = name, "component already realized; user factory ignored");
            return;
        }
        let mut user = entry.user.write();
        if user.is_some() {
            warn!(component = name, "user factory already registered; later one ignored");
            return;
        }
        debug!(component = name, "registering user factory");
        *user = Some(erase(factory));
    }

    /// Register a hook run for `name` by `shutdown`, if it was realized
    pub fn on_destroy<F>(&self, name: &str, hook: F) -> Result<()>
    where
        F: Fn(&Component) -> Result<()> + Send + Sync + 'static,
    {
        let entry = self
            .existing(name)
            .ok_or_else(|| WeaverError::component_not_found(name))?;
        entry.destroy_hooks.lock().push(Arc::new(hook));
        Ok(())
    }

    /// Get (building on first use) the component registered under `name`
    pub fn resolve(&self, name: &str) -> Result<Component> {
        self.resolve_in(name, &[])
    }

    /// `resolve` plus a downcast to `T`
    pub fn resolve_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        downcast(name, self.resolve(name)?)
    }

    fn resolve_in(&self, name: &str, chain: &[String]) -> Result<Component> {
        let entry = self
            .existing(name)
            .ok_or_else(|| WeaverError::component_not_found(name))?;

        if let Some(instance) = entry.instance.get() {
            return Ok(Arc::clone(instance));
        }

        if chain.iter().any(|n| n == name) {
            let mut cycle = chain.to_vec();
            cycle.push(name.to_string());
            return Err(WeaverError::CircularDependency { chain: cycle }.into());
        }

        let instance = entry
            .instance
            .get_or_try_init(|| self.realize(name, &entry, chain))?;
        Ok(Arc::clone(instance))
    }

    fn realize(&self, name: &str, entry: &Entry, chain: &[String]) -> Result<Component> {
        let mut next = chain.to_vec();
        next.push(name.to_string());
        let ctx = FactoryContext {
            registry: self,
            chain: next,
        };

        let user = entry.user.read().clone();
        let component = match user {
            Some(factory) => {
                debug!(component = name, "building from user factory");
                factory(&ctx)?
            }
            None => self.realize_default(name, entry, &ctx)?,
        };

        let count = {
            let mut realized = self.realized.lock();
            realized.push(name.to_string());
            realized.len()
        };
        METRICS.update_components_realized(count);
        info!(component = name, "component realized");
        Ok(component)
    }

    fn realize_default(&self, name: &str, entry: &Entry, ctx: &FactoryContext<'_>) -> Result<Component> {
        let defaults = entry.defaults.read().clone();
        let mut reasons = Vec::with_capacity(defaults.len());

        for (index, default) in defaults.iter().enumerate() {
            let outcome = default.condition.evaluate(&self.env, self);
            debug!(
                component = name,
                index = index,
                condition = %default.condition.describe(),
                outcome = %outcome,
                "condition evaluated"
            );
            *default.last_outcome.lock() = Some(outcome.clone());

            if outcome.matched {
                return (default.factory)(ctx);
            }
            reasons.push(outcome.message);
        }

        Err(WeaverError::UnsatisfiedCondition {
            name: name.to_string(),
            reasons,
        }
        .into())
    }

    /// Names realized so far, in realization order
    pub fn realized(&self) -> Vec<String> {
        self.realized.lock().clone()
    }

    /// Registered component names, in first-registration order
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Condition outcome of every default factory
    pub fn condition_report(&self) -> Vec<ConditionReportEntry> {
        let entries = self.entries.read();
        let mut report = Vec::new();
        for (name, entry) in entries.iter() {
            let overridden = entry.user.read().is_some();
            for (index, default) in entry.defaults.read().iter().enumerate() {
                report.push(ConditionReportEntry {
                    component: name.clone(),
                    index,
                    condition: default.condition.describe(),
                    outcome: default.last_outcome.lock().clone(),
                    overridden,
                });
            }
        }
        report
    }

    /// Run destroy hooks of realized components, most recently realized first
    ///
    /// Hook failures are logged and do not stop the remaining hooks. Returns
    /// the names visited, in the order their hooks ran.
    pub fn shutdown(&self) -> Vec<String> {
        let realized: Vec<String> = std::mem::take(&mut *self.realized.lock());
        let mut destroyed = Vec::with_capacity(realized.len());

        for name in realized.into_iter().rev() {
            let Some(entry) = self.existing(&name) else {
                continue;
            };
            let Some(instance) = entry.instance.get() else {
                continue;
            };
            let hooks = entry.destroy_hooks.lock().clone();
            for hook in hooks {
                if let Err(err) = hook(instance) {
                    error!(component = %name, error = %err, "destroy hook failed");
                }
            }
            debug!(component = %name, "component destroyed");
            destroyed.push(name);
        }

        METRICS.update_components_realized(0);
        info!(count = destroyed.len(), "component registry shut down");
        destroyed
    }
}

impl ComponentLookup for ComponentRegistry {
    fn has_user_factory(&self, name: &str) -> bool {
        self.existing(name)
            .is_some_and(|entry| entry.user.read().is_some())
    }

    fn is_realized(&self, name: &str) -> bool {
        self.existing(name)
            .is_some_and(|entry| entry.instance.get().is_some())
    }

    fn is_registered(&self, name: &str) -> bool {
        self.existing(name).is_some_and(|entry| {
            entry.user.read().is_some() || !entry.defaults.read().is_empty()
        })
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("names", &self.names())
            .field("realized", &self.realized())
            .finish()
    }
}

fn erase<T, F>(factory: F) -> Arc<FactoryFn>
where
    T: Any + Send + Sync,
    F: Fn(&FactoryContext<'_>) -> Result<T> + Send + Sync + 'static,
{
    Arc::new(move |ctx: &FactoryContext<'_>| {
        let component: Component = Arc::new(factory(ctx)?);
        Ok::<_, anyhow::Error>(component)
    })
}

fn downcast<T: Any + Send + Sync>(name: &str, component: Component) -> Result<Arc<T>> {
    component.downcast::<T>().map_err(|_| {
        WeaverError::ComponentTypeMismatch {
            name: name.to_string(),
            expected: type_name::<T>(),
        }
        .into()
    })
}
