//! Stack configuration values.
//!
//! [`StackValues`] is what a stack program reads its settings from. Values
//! come from the `config` section of the file, resolved against the
//! environment, and can be overridden with `STACKWEAVE_CONFIG_<KEY>` (plain)
//! or `STACKWEAVE_SECRET_<KEY>` (sensitive). Sensitive values are only ever
//! handed out wrapped in a secret [`Output`].

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::output::Output;

use super::spec::{ConfigValue, StackConfig};

/// Prefix of plain config overrides.
pub const CONFIG_ENV_PREFIX: &str = "STACKWEAVE_CONFIG_";

/// Prefix of sensitive config overrides.
pub const SECRET_ENV_PREFIX: &str = "STACKWEAVE_SECRET_";

#[derive(Clone, PartialEq, Eq)]
struct Entry {
    value: String,
    secret: bool,
}

/// Resolved config keys of a stack.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StackValues {
    entries: BTreeMap<String, Entry>,
}

impl fmt::Debug for StackValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, e)| {
                let shown = if e.secret { crate::output::REDACTED } else { e.value.as_str() };
                (k, shown)
            }))
            .finish()
    }
}

impl StackValues {
    /// Creates an empty value set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the `config` section against the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] when a value refers to an
    /// unset environment variable.
    pub fn from_config(config: &StackConfig) -> Result<Self> {
        Self::resolve(config, std::env::vars())
    }

    /// Resolves the `config` section against the given environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] when a value refers to an
    /// unset environment variable.
    pub fn resolve<I>(config: &StackConfig, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: BTreeMap<String, String> = vars.into_iter().collect();
        let mut values = Self::new();

        for (key, value) in &config.config {
            let entry = match value {
                ConfigValue::Plain(value) => Entry {
                    value: value.clone(),
                    secret: false,
                },
                ConfigValue::Secret { secret } => Entry {
                    value: secret.clone(),
                    secret: true,
                },
                ConfigValue::Env { env, secret } => {
                    let value = vars.get(env).cloned().ok_or_else(|| ConfigError::MissingEnvVar {
                        name: env.clone(),
                    })?;
                    Entry {
                        value,
                        secret: *secret,
                    }
                }
            };
            values.entries.insert(key.clone(), entry);
        }

        for (name, value) in &vars {
            if let Some(key) = name.strip_prefix(CONFIG_ENV_PREFIX) {
                debug!("Overriding config key {} from environment", key.to_lowercase());
                values.set(&key.to_lowercase(), value.clone());
            } else if let Some(key) = name.strip_prefix(SECRET_ENV_PREFIX) {
                debug!("Overriding secret key {} from environment", key.to_lowercase());
                values.set_secret(&key.to_lowercase(), value.clone());
            }
        }

        Ok(values)
    }

    /// Sets a plain value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                secret: false,
            },
        );
    }

    /// Sets a sensitive value.
    pub fn set_secret(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                secret: true,
            },
        );
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Builder form of [`set_secret`](Self::set_secret).
    #[must_use]
    pub fn with_secret(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_secret(key, value);
        self
    }

    /// Returns true if the key is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns true if the key is set and sensitive.
    #[must_use]
    pub fn is_secret(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| e.secret)
    }

    /// Every key, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Reads an optional plain value. Sensitive keys read as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|e| !e.secret)
            .map(|e| e.value.as_str())
    }

    /// Reads a required plain value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKey`] if the key is unset, or a
    /// validation error if it is sensitive.
    pub fn require(&self, key: &str) -> Result<&str> {
        let entry = self.entry(key)?;
        if entry.secret {
            return Err(ConfigError::validation(
                format!("'{key}' is sensitive; read it with require_secret"),
                key,
            )
            .into());
        }
        Ok(&entry.value)
    }

    /// Reads a required value as a secret deferred value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKey`] if the key is unset.
    pub fn require_secret(&self, key: &str) -> Result<Output<Value>> {
        let entry = self.entry(key)?;
        Ok(Output::secret(Value::String(entry.value.clone())))
    }

    /// Reads a required value as a deferred value, secret if the key is.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKey`] if the key is unset.
    pub fn require_output(&self, key: &str) -> Result<Output<Value>> {
        let entry = self.entry(key)?;
        let value = Value::String(entry.value.clone());
        Ok(if entry.secret {
            Output::secret(value)
        } else {
            Output::known(value)
        })
    }

    fn entry(&self, key: &str) -> Result<&Entry> {
        self.entries.get(key).ok_or_else(|| {
            ConfigError::MissingKey {
                key: key.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::StackweaveError;

    fn config() -> StackConfig {
        ConfigParser::new()
            .parse_yaml(
                r"
stack:
  name: wordpress
config:
  location: westeurope
  admin_password:
    secret: hunter2
  db_name:
    env: WP_DB_NAME
",
                None,
            )
            .expect("parse")
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_resolves_plain_secret_and_env_values() {
        let values = StackValues::resolve(&config(), vars(&[("WP_DB_NAME", "wordpress")]))
            .expect("resolve");

        assert_eq!(values.require("location").expect("location"), "westeurope");
        assert_eq!(values.require("db_name").expect("db_name"), "wordpress");
        assert!(values.is_secret("admin_password"));
        assert_eq!(values.get("admin_password"), None);
    }

    #[test]
    fn test_missing_env_var_is_a_config_error() {
        let err = StackValues::resolve(&config(), vars(&[])).expect_err("unset var");
        assert!(matches!(
            err,
            StackweaveError::Config(ConfigError::MissingEnvVar { name }) if name == "WP_DB_NAME"
        ));
    }

    #[test]
    fn test_environment_overrides() {
        let values = StackValues::resolve(
            &config(),
            vars(&[
                ("WP_DB_NAME", "wordpress"),
                ("STACKWEAVE_CONFIG_LOCATION", "eastus"),
                ("STACKWEAVE_SECRET_DB_NAME", "hidden"),
            ]),
        )
        .expect("resolve");

        assert_eq!(values.require("location").expect("location"), "eastus");
        assert!(values.is_secret("db_name"));
    }

    #[test]
    fn test_missing_key_is_reported() {
        let err = StackValues::new().require("vnet_name").expect_err("missing");
        assert!(matches!(
            err,
            StackweaveError::Config(ConfigError::MissingKey { key }) if key == "vnet_name"
        ));
    }

    #[test]
    fn test_secret_cannot_be_read_as_plain() {
        let values = StackValues::new().with_secret("admin_password", "pw");
        assert!(values.require("admin_password").is_err());
    }

    #[tokio::test]
    async fn test_require_secret_yields_secret_output() {
        let values = StackValues::new().with_secret("admin_password", "pw").with("login", "admin");

        let password = values.require_secret("admin_password").expect("secret");
        assert!(password.is_secret());
        let resolved = password.resolve().await.expect("resolve");
        assert_eq!(resolved.value, Value::String(String::from("pw")));

        let login = values.require_output("login").expect("login");
        assert!(!login.is_secret());
        assert!(values.require_secret("login").expect("as secret").is_secret());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let values = StackValues::new().with_secret("admin_password", "hunter2");
        assert!(!format!("{values:?}").contains("hunter2"));
    }
}
