//! Lookups over resolved resource outputs.
//!
//! Some providers return child objects as a list property (subnets of a
//! virtual network, origins of a CDN endpoint). Stack programs pick one by
//! name once the parent resolves, typically inside [`Output::try_apply`].
//!
//! [`Output::try_apply`]: crate::output::Output::try_apply

use serde_json::Value;

use crate::error::ConfigError;

/// Finds the first object in a list output whose `name` matches.
///
/// # Errors
///
/// Returns [`ConfigError::NotFound`] if `items` is not a list or no element
/// carries the name.
pub fn find_by_name<'a>(items: &'a Value, what: &str, name: &str) -> Result<&'a Value, ConfigError> {
    items
        .as_array()
        .and_then(|list| {
            list.iter()
                .find(|item| item.get("name").and_then(Value::as_str) == Some(name))
        })
        .ok_or_else(|| ConfigError::NotFound {
            what: what.to_string(),
            name: name.to_string(),
        })
}

/// Finds a named object in a list output and returns one of its properties.
///
/// # Errors
///
/// Returns [`ConfigError::NotFound`] if the object is missing or lacks the
/// property.
pub fn property_by_name(
    items: &Value,
    what: &str,
    name: &str,
    property: &str,
) -> Result<Value, ConfigError> {
    let item = find_by_name(items, what, name)?;
    item.get(property).cloned().ok_or_else(|| ConfigError::NotFound {
        what: format!("{what} property '{property}' of"),
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subnets() -> Value {
        json!([
            {"name": "default", "id": "/subnets/default"},
            {"name": "web", "id": "/subnets/web"},
            {"name": "web", "id": "/subnets/web-shadow"},
        ])
    }

    #[test]
    fn test_first_match_wins() {
        let subnets = subnets();
        let found = find_by_name(&subnets, "subnet", "web").expect("found");
        assert_eq!(found["id"], "/subnets/web");
    }

    #[test]
    fn test_missing_name_is_not_found() {
        let err = find_by_name(&subnets(), "subnet", "db").expect_err("missing");
        assert!(matches!(err, ConfigError::NotFound { ref name, .. } if name == "db"));
        assert_eq!(err.to_string(), "subnet 'db' not found");
    }

    #[test]
    fn test_non_list_is_not_found() {
        assert!(find_by_name(&json!({"name": "web"}), "subnet", "web").is_err());
    }

    #[test]
    fn test_property_by_name() {
        let id = property_by_name(&subnets(), "subnet", "default", "id").expect("id");
        assert_eq!(id, json!("/subnets/default"));
        assert!(property_by_name(&subnets(), "subnet", "default", "prefix").is_err());
    }
}
