//! Logical resource identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the type token and the logical name.
const SEPARATOR: &str = "::";

/// Stable logical identity of a resource: its type token plus logical name.
///
/// This is the key used to correlate a declared resource with its recorded
/// state across runs. It serializes as `type::name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    type_token: String,
    name: String,
}

impl ResourceId {
    /// Creates a new identity.
    #[must_use]
    pub fn new(type_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_token: type_token.into(),
            name: name.into(),
        }
    }

    /// Returns the resource type token (e.g. `azure-native:web:WebApp`).
    #[must_use]
    pub fn type_token(&self) -> &str {
        &self.type_token
    }

    /// Returns the logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parses a `type::name` key.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let (type_token, name) = key.split_once(SEPARATOR)?;
        if type_token.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(type_token, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.type_token, self.name)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid resource identity: {value}"))
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_display() {
        let id = ResourceId::new("azure-native:resources:ResourceGroup", "rg-main");
        assert_eq!(ResourceId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        assert_eq!(ResourceId::parse("no-separator"), None);
        assert_eq!(ResourceId::parse("::name"), None);
        assert_eq!(ResourceId::parse("type::"), None);
    }

    #[test]
    fn test_serializes_as_key_string() {
        let id = ResourceId::new("test:kind", "alpha");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"test:kind::alpha\"");
    }
}
