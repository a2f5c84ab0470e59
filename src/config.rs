use crate::aspects::AspectsConfig;
use crate::audit::AuditConfig;
use crate::conditional::Environment;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Run the scripted interception and auto-configuration walkthrough
    #[default]
    Demo,
    /// Serve the actuator and users API over HTTP
    Serve,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Demo => write!(f, "demo"),
            RunMode::Serve => write!(f, "serve"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: RunMode,
    pub http_bind_address: SocketAddr,
    /// Flattened `a.b.c` keys; later sources override earlier ones
    pub properties: IndexMap<String, String>,
    pub profiles: Vec<String>,
    pub principal: Option<String>,
    pub roles: Vec<String>,
    pub aspects: AspectsConfig,
    pub audit: AuditConfig,
    pub shutdown_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            http_bind_address: default_bind(),
            properties: IndexMap::new(),
            profiles: Vec::new(),
            principal: None,
            roles: Vec::new(),
            aspects: AspectsConfig::default(),
            audit: AuditConfig::default(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

fn default_bind() -> SocketAddr {
    DEFAULT_HTTP_BIND
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080)))
}

impl AppConfig {
    /// Merge CLI arguments over the optional config file over defaults
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            mode: cli_mode,
            http_bind: cli_http_bind,
            properties: cli_properties,
            profiles: cli_profiles,
            principal: cli_principal,
            roles: cli_roles,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            mode: file_mode,
            http_bind: file_http_bind,
            properties: file_properties,
            profiles: file_profiles,
            principal: file_principal,
            roles: file_roles,
            aspects: file_aspects,
            audit: file_audit,
            shutdown_timeout_secs: file_shutdown_timeout,
        } = file_config;

        let mut properties = IndexMap::new();
        if let Some(tree) = file_properties {
            flatten_properties("", &tree, &mut properties);
        }
        for (key, value) in cli_properties {
            properties.insert(key, value);
        }

        let mut profiles = Vec::new();
        for profile in file_profiles
            .unwrap_or_default()
            .into_iter()
            .chain(cli_profiles)
        {
            let profile = profile.trim().to_string();
            if !profile.is_empty() && !profiles.contains(&profile) {
                profiles.push(profile);
            }
        }

        let roles = if cli_roles.is_empty() {
            file_roles.unwrap_or_default()
        } else {
            cli_roles
        };

        let audit = file_audit.unwrap_or_default();
        anyhow::ensure!(
            audit.memory_buffer_size > 0,
            "audit.memory_buffer_size must be at least 1"
        );

        Ok(Self {
            mode: cli_mode.or(file_mode).unwrap_or_default(),
            http_bind_address: cli_http_bind.or(file_http_bind).unwrap_or_else(default_bind),
            properties,
            profiles,
            principal: cli_principal.or(file_principal),
            roles,
            aspects: file_aspects.unwrap_or_default(),
            audit,
            shutdown_timeout_secs: file_shutdown_timeout
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS)
                .max(1),
        })
    }

    /// Properties and profiles as seen by conditions and factories
    pub fn environment(&self) -> Environment {
        let mut env = Environment::from_properties(
            self.properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        for profile in &self.profiles {
            env.activate_profile(profile.clone());
        }
        env
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "weaver",
    about = "Method interception and conditional component wiring",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML, JSON or TOML)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "WEAVER_MODE",
        value_enum,
        value_name = "MODE",
        help = "What to run (demo or serve)"
    )]
    pub mode: Option<RunMode>,

    #[arg(
        long,
        env = "WEAVER_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address in serve mode"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long = "property",
        short = 'D',
        env = "WEAVER_PROPERTIES",
        value_name = "KEY=VALUE",
        value_delimiter = ',',
        value_parser = parse_property,
        help = "Set an environment property (repeatable)"
    )]
    pub properties: Vec<(String, String)>,

    #[arg(
        long = "profile",
        env = "WEAVER_PROFILES",
        value_name = "NAME",
        value_delimiter = ',',
        help = "Activate a profile (repeatable)"
    )]
    pub profiles: Vec<String>,

    #[arg(
        long,
        env = "WEAVER_PRINCIPAL",
        value_name = "NAME",
        help = "Principal authenticated for secured operations"
    )]
    pub principal: Option<String>,

    #[arg(
        long,
        env = "WEAVER_ROLES",
        value_name = "ROLE",
        value_delimiter = ',',
        help = "Comma-separated roles held by the principal"
    )]
    pub roles: Vec<String>,
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty property key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    mode: Option<RunMode>,
    http_bind: Option<SocketAddr>,
    properties: Option<Value>,
    profiles: Option<Vec<String>>,
    principal: Option<String>,
    roles: Option<Vec<String>>,
    aspects: Option<AspectsConfig>,
    audit: Option<AuditConfig>,
    shutdown_timeout_secs: Option<u64>,
}

/// `{greeting: {enabled: true}}` becomes `greeting.enabled = "true"`
fn flatten_properties(prefix: &str, value: &Value, out: &mut IndexMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_properties(&path, child, out);
            }
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(scalar_to_string)
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
        Value::Null => {}
        scalar => {
            out.insert(prefix.to_string(), scalar_to_string(scalar));
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        "toml" => toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
