//! Configuration specification types for the provisioning engine.
//!
//! This module defines all the structs that map to the `halyard.deploy.yaml` file.
//! These types are declarative and fully describe the desired state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The root configuration structure for a Halyard deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider connection settings.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Executor tuning.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Input variables, keyed by name.
    #[serde(default)]
    pub variables: BTreeMap<String, VariableConfig>,
    /// Declared resources, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Output values, keyed by name.
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Which provider implementation to use.
    #[serde(default)]
    pub kind: ProviderKind,
    /// Gateway base URL (required for the http provider).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Region passed to the provider with every request.
    #[serde(default)]
    pub region: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Provider implementations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-process simulated cloud.
    #[default]
    Memory,
    /// JSON REST provider gateway.
    Http,
}

/// Executor tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of actions in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Maximum attempts per provider call (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// A declared input variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VariableConfig {
    /// Declared value type.
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Default value, used when no override is given.
    #[serde(default)]
    pub default: Option<Value>,
}

/// Variable value types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    /// A string.
    String,
    /// A number.
    Number,
    /// A boolean.
    Bool,
    /// A list of values.
    List,
    /// A mapping of values.
    Map,
    /// Any JSON value.
    #[default]
    Any,
}

/// A declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Resource type, e.g. `aws_elb`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource name, unique per type.
    pub name: String,
    /// Attribute values; strings may contain `${...}` references.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Explicit dependencies as `type.name`.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A declared output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    /// Expression, usually `${type.name.attribute}`.
    pub value: Value,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Hide the value in text output.
    #[serde(default)]
    pub sensitive: bool,
}

// Default value functions

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_concurrency() -> usize {
    10
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_environment() -> String {
    String::from("dev")
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            endpoint: None,
            region: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl VariableType {
    /// Returns true if `value` is acceptable for this type.
    #[must_use]
    pub const fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => matches!(value, Value::String(_)),
            Self::Number => matches!(value, Value::Number(_)),
            Self::Bool => matches!(value, Value::Bool(_)),
            Self::List => matches!(value, Value::Array(_)),
            Self::Map => matches!(value, Value::Object(_)),
            Self::Any => true,
        }
    }

    /// Parses a raw command-line or environment value into this type.
    ///
    /// Strings are taken verbatim; other types are parsed as JSON.
    #[must_use]
    pub fn parse_raw(self, raw: &str) -> Value {
        match self {
            Self::String => Value::String(raw.to_string()),
            _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        }
    }
}

/// Returns the type name of a JSON value, for error messages.
#[must_use]
pub const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        };
        write!(f, "{s}")
    }
}

impl ResourceConfig {
    /// Returns the `type.name` address of this resource.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}
