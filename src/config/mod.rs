//! Configuration module for Stackweave stacks.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stackweave.yaml`
//! - Validation of configuration values
//! - Resolving the config keys a stack program reads

mod parser;
mod spec;
mod validator;
mod values;

pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES, PROVIDER_TOKEN_VAR};
pub use spec::{
    ConfigValue, EngineConfig, PolicyConfig, ProviderConfig, RetryConfig, StackConfig,
    StackSection, StateConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use values::{StackValues, CONFIG_ENV_PREFIX, SECRET_ENV_PREFIX};
