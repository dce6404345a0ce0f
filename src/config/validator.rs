//! Configuration validation for stack configs.
//!
//! This module checks a parsed configuration before anything is declared:
//! stack identity, config key names and the keys the stack program needs,
//! engine option ranges, the provider section, and policy choices that
//! weaken security (reported as warnings).

use std::collections::BTreeSet;
use tracing::debug;
use validator::Validate;

use crate::error::{ConfigError, Result, StackweaveError};
use crate::stacks;

use super::spec::{ConfigValue, StackConfig};
use super::values::{CONFIG_ENV_PREFIX, SECRET_ENV_PREFIX};

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Keys the stack program requires.
    required_keys: BTreeSet<String>,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a validator with no required keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds keys the stack program requires.
    #[must_use]
    pub fn require_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Validates a stack configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_stack(config, &mut result);
        self.validate_keys(config, &mut result);
        Self::validate_engine(config, &mut result);
        Self::validate_provider(config, &mut result);
        Self::validate_policy(config, &mut result);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StackweaveError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates stack identity.
    fn validate_stack(config: &StackConfig, result: &mut ValidationResult) {
        if !is_valid_name(&config.stack.name) {
            result.errors.push(ValidationError {
                field: String::from("stack.name"),
                message: format!(
                    "Stack name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.stack.name
                ),
            });
        }

        if !is_valid_name(&config.stack.environment) {
            result.errors.push(ValidationError {
                field: String::from("stack.environment"),
                message: format!(
                    "Environment '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.stack.environment
                ),
            });
        }

        if stacks::find(&config.stack.program).is_none() {
            result.errors.push(ValidationError {
                field: String::from("stack.program"),
                message: format!("Unknown stack program '{}'", config.stack.program),
            });
        }
    }

    /// Validates config key names and required keys.
    fn validate_keys(&self, config: &StackConfig, result: &mut ValidationResult) {
        for (key, value) in &config.config {
            if !is_valid_key(key) {
                result.errors.push(ValidationError {
                    field: format!("config.{key}"),
                    message: format!(
                        "Config key '{key}' is invalid. Must be lowercase alphanumeric with underscores."
                    ),
                });
            }

            match value {
                ConfigValue::Secret { secret } if secret.is_empty() => {
                    result.warnings.push(format!("config.{key}: secret value is empty"));
                }
                ConfigValue::Env { env, .. } if env.is_empty() => {
                    result.errors.push(ValidationError {
                        field: format!("config.{key}.env"),
                        message: String::from("Environment variable name cannot be empty"),
                    });
                }
                _ => {}
            }
        }

        for key in &self.required_keys {
            let overridden = [CONFIG_ENV_PREFIX, SECRET_ENV_PREFIX]
                .iter()
                .any(|prefix| std::env::var(format!("{prefix}{}", key.to_uppercase())).is_ok());
            if !config.config.contains_key(key) && !overridden {
                result.errors.push(ValidationError {
                    field: format!("config.{key}"),
                    message: format!("Missing required config key '{key}'"),
                });
            }
        }
    }

    /// Validates engine option ranges.
    fn validate_engine(config: &StackConfig, result: &mut ValidationResult) {
        if let Err(errors) = config.engine.validate() {
            result.errors.push(ValidationError {
                field: String::from("engine"),
                message: errors.to_string().replace('\n', "; "),
            });
        }

        let retry = &config.engine.retry;
        if retry.base_delay_ms > retry.max_delay_ms {
            result.errors.push(ValidationError {
                field: String::from("engine.retry.base_delay_ms"),
                message: format!(
                    "Base delay {}ms exceeds the maximum delay {}ms",
                    retry.base_delay_ms, retry.max_delay_ms
                ),
            });
        }

        if config.engine.max_parallel > 50 {
            result.warnings.push(format!(
                "engine.max_parallel: {} concurrent operations may trip provider rate limits",
                config.engine.max_parallel
            ));
        }
    }

    /// Validates the provider section.
    fn validate_provider(config: &StackConfig, result: &mut ValidationResult) {
        if let Some(endpoint) = &config.provider.endpoint
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            result.errors.push(ValidationError {
                field: String::from("provider.endpoint"),
                message: format!("Provider endpoint must be an http(s) URL: {endpoint}"),
            });
        }

        if config.provider.timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("provider.timeout_secs"),
                message: String::from("Provider timeout must be at least 1 second"),
            });
        }

        if config.provider.endpoint.is_none() {
            result
                .warnings
                .push(String::from("provider.endpoint: not set, only simulated runs are possible"));
        }
    }

    /// Reports policy choices that weaken security.
    fn validate_policy(config: &StackConfig, result: &mut ValidationResult) {
        if !config.policy.require_secure_transport {
            result.warnings.push(String::from(
                "policy.require_secure_transport: database connections will accept plaintext",
            ));
        }

        if config.policy.inline_secret_app_settings {
            result.warnings.push(String::from(
                "policy.inline_secret_app_settings: the database password becomes a plain app setting",
            ));
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Config keys are lowercase alphanumeric with underscores, starting with a letter.
fn is_valid_key(key: &str) -> bool {
    key.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
