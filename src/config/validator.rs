//! Configuration validation for deployment specs.
//!
//! This module checks field-level values before the graph is built. Structural
//! problems (duplicate identities, dangling references, cycles) are left to the
//! graph builder, which reports them with typed errors.

use crate::error::{ConfigError, HalyardError, Result};
use tracing::debug;

use super::spec::{
    DeployConfig, ExecutorConfig, ProjectConfig, ProviderConfig, ProviderKind, ResourceConfig,
    StateBackend, StateConfig,
};

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<FieldError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single field-level validation error.
#[derive(Debug)]
pub struct FieldError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(HalyardError::Config(ConfigError::Invalid {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        Self::validate_executor(&config.executor, &mut result);
        Self::validate_variables(config, &mut result);
        Self::validate_resources(&config.resources, &mut result);

        result
    }

    /// Validates project configuration.
    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {}
        }
    }

    /// Validates provider configuration.
    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        if provider.kind == ProviderKind::Http {
            match provider.endpoint.as_deref() {
                None | Some("") => result.error(
                    "provider.endpoint",
                    "An endpoint is required when using the http provider",
                ),
                Some(endpoint)
                    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") =>
                {
                    result.error(
                        "provider.endpoint",
                        format!("Endpoint '{endpoint}' must start with http:// or https://"),
                    );
                }
                Some(_) => {}
            }
        }

        if provider.timeout_secs == 0 {
            result.error("provider.timeout_secs", "Timeout must be at least 1 second");
        }
    }

    /// Validates executor tuning.
    fn validate_executor(executor: &ExecutorConfig, result: &mut ValidationResult) {
        if executor.concurrency == 0 {
            result.error("executor.concurrency", "Concurrency must be at least 1");
        }
        if executor.max_attempts == 0 {
            result.error("executor.max_attempts", "At least one attempt is required");
        }
        if executor.base_delay_ms > executor.max_delay_ms {
            result.error(
                "executor.base_delay_ms",
                "Base delay cannot exceed max_delay_ms",
            );
        }
    }

    /// Validates variable declarations.
    fn validate_variables(config: &DeployConfig, result: &mut ValidationResult) {
        for (name, variable) in &config.variables {
            if !is_valid_identifier(name) {
                result.error(
                    format!("variables.{name}"),
                    format!("Variable name '{name}' is invalid"),
                );
            }

            if let Some(default) = &variable.default
                && !variable.var_type.accepts(default)
            {
                result.error(
                    format!("variables.{name}.default"),
                    format!(
                        "Default for '{name}' does not match declared type {}",
                        variable.var_type
                    ),
                );
            }

            if variable.description.is_none() {
                result
                    .warnings
                    .push(format!("variables.{name}: No description provided"));
            }
        }
    }

    /// Validates all resource declarations.
    fn validate_resources(resources: &[ResourceConfig], result: &mut ValidationResult) {
        if resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in configuration"));
            return;
        }

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !is_valid_identifier(&resource.resource_type) {
                result.error(
                    format!("{prefix}.type"),
                    format!("Resource type '{}' is invalid", resource.resource_type),
                );
            }

            if !is_valid_identifier(&resource.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must start with a letter and contain only lowercase letters, digits, '-' or '_'.",
                        resource.name
                    ),
                );
            }

            for (j, dep) in resource.depends_on.iter().enumerate() {
                let well_formed = dep
                    .split_once('.')
                    .is_some_and(|(t, n)| is_valid_identifier(t) && is_valid_identifier(n));
                if !well_formed {
                    result.error(
                        format!("{prefix}.depends_on[{j}]"),
                        format!("Dependency '{dep}' must be of the form type.name"),
                    );
                }
            }
        }
    }
}

/// Validates that a name follows the project naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
    {
        return false;
    }

    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    if name.ends_with('-') {
        return false;
    }

    !name.contains("--")
}

/// Validates a resource type, resource name or variable name.
pub(crate) fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_lowercase()
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

impl ValidationResult {
    /// Records an error for a field.
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> DeployConfig {
        ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("test config should parse")
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web-cluster"));
        assert!(is_valid_name("a"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web"));
        assert!(!is_valid_name("web-"));
        assert!(!is_valid_name("web--cluster"));
    }

    #[test]
    fn test_valid_identifier() {
        assert!(is_valid_identifier("aws_security_group"));
        assert!(is_valid_identifier("server_port"));
        assert!(!is_valid_identifier("1st"));
        assert!(!is_valid_identifier("has.dot"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_http_provider_requires_endpoint() {
        let config = parse(
            r"
project:
  name: web
provider:
  kind: http
",
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn test_default_type_mismatch() {
        let config = parse(
            r#"
project:
  name: web
variables:
  server_port:
    type: number
    default: "eighty"
"#,
        );
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_bad_depends_on() {
        let config = parse(
            r"
project:
  name: web
resources:
  - type: aws_elb
    name: example
    depends_on: [not-an-address]
",
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("type.name"));
    }

    #[test]
    fn test_empty_resources_warns() {
        let config = parse("project:\n  name: web\n");
        let result = ConfigValidator::new().validate(&config).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }
}
