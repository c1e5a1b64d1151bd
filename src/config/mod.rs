//! Configuration module for the Halyard provisioning engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `halyard.deploy.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    value_kind, DeployConfig, ExecutorConfig, OutputConfig, ProjectConfig, ProviderConfig,
    ProviderKind, ResourceConfig, StateBackend, StateConfig, VariableConfig, VariableType,
};
pub use parser::{collect_variable_overrides, find_config_file, ConfigParser, VAR_ENV_PREFIX};
pub use validator::{ConfigValidator, FieldError, ValidationResult};
pub use hash::ConfigHasher;

pub(crate) use validator::is_valid_identifier;
