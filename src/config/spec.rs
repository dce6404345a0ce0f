//! Configuration specification types.
//!
//! This module defines the structs that map to the `stackweave.yaml` file:
//! stack identity, the flat key/value config the stack program reads, and
//! the engine, state, provider, and policy sections.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

use crate::engine::{FailurePolicy, RunOptions, DEFAULT_MAX_PARALLEL};
use crate::provider::{RetryPolicy, DEFAULT_TIMEOUT_SECS};

/// The root configuration structure for a stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackConfig {
    /// Stack identity.
    pub stack: StackSection,
    /// Keys read by the stack program.
    #[serde(default)]
    pub config: BTreeMap<String, ConfigValue>,
    /// Executor options.
    #[serde(default)]
    pub engine: EngineConfig,
    /// State storage options.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider gateway options.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Security policy of the bundled stack.
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Stack identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackSection {
    /// Stack name.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Bundled stack program to run.
    #[serde(default = "default_program")]
    pub program: String,
}

/// A config value as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConfigValue {
    /// A plain string.
    Plain(String),
    /// A sensitive literal: `{ secret: "..." }`.
    Secret {
        /// The sensitive value.
        secret: String,
    },
    /// A value read from an environment variable: `{ env: VAR }`.
    Env {
        /// Variable name.
        env: String,
        /// Whether the value is sensitive.
        #[serde(default)]
        secret: bool,
    },
}

impl ConfigValue {
    /// Returns true if the value is sensitive.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        match self {
            Self::Plain(_) => false,
            Self::Secret { .. } => true,
            Self::Env { secret, .. } => *secret,
        }
    }
}

/// Executor options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct EngineConfig {
    /// Maximum number of resources operated on at once.
    #[serde(default = "default_max_parallel")]
    #[validate(range(min = 1, max = 256))]
    pub max_parallel: usize,
    /// Failure handling.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Wall-clock budget for a run.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub deadline_secs: Option<u64>,
    /// Re-read unchanged resources from the provider.
    #[serde(default)]
    pub refresh: bool,
    /// Backoff for transient provider failures.
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            failure_policy: FailurePolicy::default(),
            deadline_secs: None,
            refresh: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct RetryConfig {
    /// Attempts per provider call, including the first.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: millis(policy.base_delay),
            max_delay_ms: millis(policy.max_delay),
        }
    }
}

/// State storage options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Directory for state files, relative to the config file.
    #[serde(default)]
    pub path: Option<String>,
}

/// Provider gateway options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Base URL of the provider gateway.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Security policy of the bundled stack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Require TLS on database connections.
    #[serde(default = "default_true")]
    pub require_secure_transport: bool,
    /// Pass the database password as a plain app setting instead of a
    /// connection string.
    #[serde(default)]
    pub inline_secret_app_settings: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            require_secure_transport: true,
            inline_secret_app_settings: false,
        }
    }
}

// Default value functions

fn default_environment() -> String {
    String::from("dev")
}

fn default_program() -> String {
    String::from("wordpress")
}

const fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_base_delay_ms() -> u64 {
    millis(RetryPolicy::default().base_delay)
}

fn default_max_delay_ms() -> u64 {
    millis(RetryPolicy::default().max_delay)
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_true() -> bool {
    true
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl StackConfig {
    /// Returns the stack name qualified by environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.stack.name, self.stack.environment)
    }

    /// Returns the names of sensitive config keys.
    #[must_use]
    pub fn secret_keys(&self) -> Vec<&str> {
        self.config
            .iter()
            .filter(|(_, v)| v.is_secret())
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

impl EngineConfig {
    /// Builds executor options from the configuration.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::default()
            .with_max_parallel(self.max_parallel)
            .with_failure_policy(self.failure_policy)
            .with_refresh(self.refresh)
            .with_retry(self.retry.policy());
        options.deadline = self.deadline_secs.map(Duration::from_secs);
        options
    }
}

impl RetryConfig {
    /// Builds the retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_value_forms() {
        let yaml = r"
location: westeurope
admin_password:
  secret: hunter2
api_token:
  env: API_TOKEN
  secret: true
";
        let values: BTreeMap<String, ConfigValue> = serde_yaml::from_str(yaml).expect("parse");

        assert_eq!(values["location"], ConfigValue::Plain(String::from("westeurope")));
        assert!(values["admin_password"].is_secret());
        assert_eq!(
            values["api_token"],
            ConfigValue::Env {
                env: String::from("API_TOKEN"),
                secret: true,
            }
        );
    }

    #[test]
    fn test_engine_defaults_map_to_run_options() {
        let engine = EngineConfig::default();
        let options = engine.run_options();

        assert_eq!(options.max_parallel, DEFAULT_MAX_PARALLEL);
        assert_eq!(options.failure_policy, FailurePolicy::FailFast);
        assert_eq!(options.retry, RetryPolicy::default());
        assert!(options.deadline.is_none());
    }

    #[test]
    fn test_engine_range_checks() {
        let engine = EngineConfig {
            max_parallel: 0,
            ..EngineConfig::default()
        };
        assert!(engine.validate().is_err());

        let engine = EngineConfig {
            deadline_secs: Some(600),
            ..EngineConfig::default()
        };
        assert!(engine.validate().is_ok());
        assert_eq!(engine.run_options().deadline, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_policy_is_secure_by_default() {
        let policy = PolicyConfig::default();
        assert!(policy.require_secure_transport);
        assert!(!policy.inline_secret_app_settings);
    }
}
