//! Resource type schemas.
//!
//! A schema tells the engine which inputs a resource type requires, which
//! properties it accepts, which of them can change without replacing the
//! resource, and whether two instances may exist side by side.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Schema of one resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Type token this schema describes.
    pub type_token: String,
    /// Inputs that must be declared.
    #[serde(default)]
    pub required: BTreeSet<String>,
    /// Every accepted input; `None` accepts anything.
    #[serde(default)]
    pub properties: Option<BTreeSet<String>>,
    /// Inputs the provider can change in place.
    #[serde(default)]
    pub updatable: BTreeSet<String>,
    /// Whether a replacement may be created before the old instance is deleted.
    #[serde(default)]
    pub allows_coexistence: bool,
    /// Outputs the provider always treats as sensitive.
    #[serde(default)]
    pub secret_outputs: BTreeSet<String>,
}

impl ResourceSchema {
    /// Creates an empty schema accepting any property, none updatable.
    #[must_use]
    pub fn new(type_token: impl Into<String>) -> Self {
        Self {
            type_token: type_token.into(),
            ..Self::default()
        }
    }

    /// Declares required inputs. Required inputs are also accepted properties.
    #[must_use]
    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if let Some(properties) = &mut self.properties {
            properties.extend(names.iter().cloned());
        }
        self.required.extend(names);
        self
    }

    /// Restricts accepted properties to the given names plus required ones.
    #[must_use]
    pub fn properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut accepted: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        accepted.extend(self.required.iter().cloned());
        accepted.extend(self.updatable.iter().cloned());
        self.properties = Some(accepted);
        self
    }

    /// Declares inputs that can be updated in place.
    #[must_use]
    pub fn updatable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if let Some(properties) = &mut self.properties {
            properties.extend(names.iter().cloned());
        }
        self.updatable.extend(names);
        self
    }

    /// Declares outputs that are always sensitive.
    #[must_use]
    pub fn secret_outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secret_outputs
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Allows create-before-delete replacement.
    #[must_use]
    pub const fn allows_coexistence(mut self, allowed: bool) -> Self {
        self.allows_coexistence = allowed;
        self
    }

    /// Returns true if a change to `property` can be applied in place.
    #[must_use]
    pub fn is_updatable(&self, property: &str) -> bool {
        self.updatable.contains(property)
    }
}

/// Anything that can look up resource schemas by type token.
pub trait SchemaSource {
    /// Returns the schema for a type, if the type is known.
    fn schema(&self, type_token: &str) -> Option<ResourceSchema>;
}

/// A fixed set of schemas keyed by type token.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, ResourceSchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a schema.
    pub fn register(&mut self, schema: ResourceSchema) {
        self.schemas.insert(schema.type_token.clone(), schema);
    }

    /// Adds a schema, builder style.
    #[must_use]
    pub fn with(mut self, schema: ResourceSchema) -> Self {
        self.register(schema);
        self
    }

    /// Returns a schema by type token.
    #[must_use]
    pub fn get(&self, type_token: &str) -> Option<&ResourceSchema> {
        self.schemas.get(type_token)
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl SchemaSource for SchemaRegistry {
    fn schema(&self, type_token: &str) -> Option<ResourceSchema> {
        self.get(type_token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_and_updatable_are_accepted_properties() {
        let schema = ResourceSchema::new("test:web")
            .required(["name"])
            .updatable(["tags"])
            .properties(["sku"]);

        let accepted = schema.properties.clone().expect("restricted");
        assert!(accepted.contains("name"));
        assert!(accepted.contains("tags"));
        assert!(accepted.contains("sku"));
        assert!(schema.is_updatable("tags"));
        assert!(!schema.is_updatable("sku"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = SchemaRegistry::new().with(ResourceSchema::new("test:db").allows_coexistence(true));
        assert_eq!(registry.len(), 1);
        assert!(registry.schema("test:db").is_some_and(|s| s.allows_coexistence));
        assert!(registry.schema("test:other").is_none());
    }
}
