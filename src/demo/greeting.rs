//! Auto-configured greeting components
//!
//! Every component here is a default factory gated by a condition, so the
//! environment decides which of them exist. A user factory registered under
//! the same name replaces the default outright.

use crate::conditional::{
    ComponentLookup, ComponentRegistry, Environment, always, on_component, on_missing_component,
    on_profile, on_property, on_property_present,
};
use serde::Deserialize;
use tracing::debug;

pub const GREETING_PROPERTIES: &str = "greetingProperties";
pub const GREETING_SERVICE: &str = "greetingService";
pub const DATA_SOURCE: &str = "dataSource";

/// Bound from `greeting.*`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GreetingProperties {
    pub enabled: bool,
    pub prefix: String,
    pub suffix: String,
}

impl Default for GreetingProperties {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "Hello".to_string(),
            suffix: "!".to_string(),
        }
    }
}

pub trait GreetingService: Send + Sync {
    fn greet(&self, name: &str) -> String;

    fn prefix(&self) -> &str;
}

/// Components are stored by concrete type, so trait objects go in a box
pub type Greeter = Box<dyn GreetingService>;

#[derive(Debug, Clone)]
pub struct DefaultGreetingService {
    properties: GreetingProperties,
}

impl DefaultGreetingService {
    pub fn new(properties: GreetingProperties) -> Self {
        Self { properties }
    }
}

impl GreetingService for DefaultGreetingService {
    fn greet(&self, name: &str) -> String {
        let mut greeting = format!("{}, {}", self.properties.prefix, name);
        if !self.properties.suffix.is_empty() {
            greeting.push(' ');
            greeting.push_str(&self.properties.suffix);
        }
        greeting
    }

    fn prefix(&self) -> &str {
        &self.properties.prefix
    }
}

/// Marker components; the value is what the demo prints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature(pub String);

fn is_production(env: &Environment, _: &dyn ComponentLookup) -> bool {
    env.get("app.environment") == Some("production")
}

pub fn register_auto_configuration(registry: &ComponentRegistry) {
    registry.register_factory(GREETING_PROPERTIES, always(), |ctx| {
        ctx.env().bind::<GreetingProperties>("greeting")
    });

    registry.register_factory(
        GREETING_SERVICE,
        on_property("greeting.enabled")
            .having_value("true")
            .match_if_missing(true),
        |ctx| {
            let properties = ctx.resolve_as::<GreetingProperties>(GREETING_PROPERTIES)?;
            debug!(prefix = %properties.prefix, "creating default greeting service");
            Ok::<Greeter, anyhow::Error>(Box::new(DefaultGreetingService::new(
                properties.as_ref().clone(),
            )))
        },
    );

    registry.register_factory(
        "cacheFeature",
        on_property("feature.cache.enabled").having_value("true"),
        |_| Ok(Feature("Cache feature is enabled!".to_string())),
    );

    registry.register_factory(
        "loggingFeature",
        on_property("feature.logging.enabled")
            .having_value("true")
            .match_if_missing(true),
        |_| Ok(Feature("Logging feature is enabled (default)".to_string())),
    );

    registry.register_factory(
        "customConfigPath",
        on_property_present("custom.config.path"),
        |ctx| {
            let path = ctx.env().get_or("custom.config.path", "");
            Ok(Feature(format!("Custom config path: {path}")))
        },
    );

    registry.register_factory("productionMarker", is_production, |_| {
        Ok(Feature("Running in PRODUCTION mode".to_string()))
    });

    registry.register_factory(
        "defaultService",
        on_missing_component("customService"),
        |_| Ok(Feature("Default service (no custom service registered)".to_string())),
    );

    registry.register_factory(DATA_SOURCE, on_profile(["prod"]), |_| {
        Ok(Feature("PostgreSQL".to_string()))
    });
    registry.register_factory(DATA_SOURCE, always(), |_| {
        Ok(Feature("H2 in-memory".to_string()))
    });

    registry.register_factory("dataSourceReport", on_component(DATA_SOURCE), |ctx| {
        let source = ctx.resolve_as::<Feature>(DATA_SOURCE)?;
        Ok(Feature(format!("DataSource configured: {}", source.0)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, error_code};

    fn registry(env: Environment) -> ComponentRegistry {
        let registry = ComponentRegistry::new(env);
        register_auto_configuration(&registry);
        registry
    }

    #[test]
    fn default_greeting() {
        let registry = registry(Environment::new());
        let greeter = registry.resolve_as::<Greeter>(GREETING_SERVICE).unwrap();
        assert_eq!(greeter.greet("World"), "Hello, World !");
        assert_eq!(greeter.prefix(), "Hello");
    }

    #[test]
    fn properties_shape_the_greeting() {
        let env = Environment::new()
            .with_property("greeting.prefix", "Hi")
            .with_property("greeting.suffix", "");
        let greeter = registry(env).resolve_as::<Greeter>(GREETING_SERVICE).unwrap();
        assert_eq!(greeter.greet("Ada"), "Hi, Ada");
    }

    #[test]
    fn numeric_looking_and_uppercase_values_bind() {
        let env = Environment::new()
            .with_property("greeting.enabled", "TRUE")
            .with_property("greeting.prefix", "007")
            .with_property("greeting.suffix", "42");
        let greeter = registry(env).resolve_as::<Greeter>(GREETING_SERVICE).unwrap();
        assert_eq!(greeter.greet("Bond"), "007, Bond 42");
    }

    #[test]
    fn disabled_greeting_is_unsatisfied() {
        let env = Environment::new().with_property("greeting.enabled", "false");
        let err = registry(env).resolve(GREETING_SERVICE).unwrap_err();
        assert_eq!(error_code(&err), ErrorCode::UnsatisfiedCondition);
    }

    #[test]
    fn user_greeter_replaces_default() {
        struct Shouting;
        impl GreetingService for Shouting {
            fn greet(&self, name: &str) -> String {
                format!("HEY {}", name.to_uppercase())
            }
            fn prefix(&self) -> &str {
                "HEY"
            }
        }

        let registry = registry(Environment::new().with_property("greeting.enabled", "false"));
        registry.register_user(GREETING_SERVICE, |_| Ok::<Greeter, anyhow::Error>(Box::new(Shouting)));
        let greeter = registry.resolve_as::<Greeter>(GREETING_SERVICE).unwrap();
        assert_eq!(greeter.greet("bob"), "HEY BOB");
    }

    #[test]
    fn profile_selects_data_source() {
        let dev = registry(Environment::new());
        assert_eq!(dev.resolve_as::<Feature>(DATA_SOURCE).unwrap().0, "H2 in-memory");

        let prod = registry(Environment::new().with_profile("prod"));
        assert_eq!(prod.resolve_as::<Feature>(DATA_SOURCE).unwrap().0, "PostgreSQL");
        assert_eq!(
            prod.resolve_as::<Feature>("dataSourceReport").unwrap().0,
            "DataSource configured: PostgreSQL"
        );
    }

    #[test]
    fn report_waits_for_its_dependency() {
        let registry = registry(Environment::new());
        // dataSource not realized yet
        assert!(registry.resolve("dataSourceReport").is_err());
        registry.resolve(DATA_SOURCE).unwrap();
        registry.resolve("dataSourceReport").unwrap();
    }

    #[test]
    fn property_gated_features() {
        let registry = registry(
            Environment::new()
                .with_property("feature.cache.enabled", "true")
                .with_property("custom.config.path", "/etc/app.yml")
                .with_property("app.environment", "production"),
        );
        for name in ["cacheFeature", "loggingFeature", "customConfigPath", "productionMarker", "defaultService"] {
            registry.resolve(name).unwrap();
        }
        assert_eq!(
            registry.resolve_as::<Feature>("customConfigPath").unwrap().0,
            "Custom config path: /etc/app.yml"
        );
    }
}
