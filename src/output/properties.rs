//! Resolved property maps with per-property sensitivity.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A plain property map: property name to JSON value.
pub type PropertyMap = BTreeMap<String, Value>;

/// Placeholder shown instead of sensitive values.
pub const REDACTED: &str = "[secret]";

/// Fully resolved properties of a resource, with the names of the sensitive ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySet {
    /// Property values.
    pub values: PropertyMap,
    /// Names of properties whose values are sensitive.
    #[serde(default)]
    pub secret: BTreeSet<String>,
}

impl PropertySet {
    /// Creates an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a property set from a plain map with no sensitive values.
    #[must_use]
    pub fn from_values(values: PropertyMap) -> Self {
        Self {
            values,
            secret: BTreeSet::new(),
        }
    }

    /// Inserts a property, recording whether it is sensitive.
    pub fn insert(&mut self, name: impl Into<String>, value: Value, secret: bool) {
        let name = name.into();
        if secret {
            self.secret.insert(name.clone());
        } else {
            self.secret.remove(&name);
        }
        self.values.insert(name, value);
    }

    /// Gets a property value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Returns true if the named property is sensitive.
    #[must_use]
    pub fn is_secret(&self, name: &str) -> bool {
        self.secret.contains(name)
    }

    /// Returns the number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a copy with every sensitive value replaced by [`REDACTED`].
    #[must_use]
    pub fn redacted(&self) -> PropertyMap {
        self.values
            .iter()
            .map(|(name, value)| {
                let shown = if self.is_secret(name) {
                    Value::String(String::from(REDACTED))
                } else {
                    value.clone()
                };
                (name.clone(), shown)
            })
            .collect()
    }
}

/// Renders a value the way it reads inside interpolated strings: strings
/// without quotes, everything else as compact JSON.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacted_hides_only_secret_values() {
        let mut props = PropertySet::new();
        props.insert("login", json!("admin"), false);
        props.insert("password", json!("hunter2"), true);

        let shown = props.redacted();
        assert_eq!(shown["login"], json!("admin"));
        assert_eq!(shown["password"], json!(REDACTED));
    }

    #[test]
    fn test_reinsert_clears_secret_flag() {
        let mut props = PropertySet::new();
        props.insert("value", json!("a"), true);
        props.insert("value", json!("b"), false);
        assert!(!props.is_secret("value"));
    }

    #[test]
    fn test_display_value_strips_string_quotes() {
        assert_eq!(display_value(&json!("server")), "server");
        assert_eq!(display_value(&json!(443)), "443");
        assert_eq!(display_value(&json!(true)), "true");
    }
}
