//! Attribute values exchanged with the host

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute name → value
pub type Attrs = Map<String, Value>;

/// Identity and attributes of one managed entity, as reported to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceData {
    pub id: String,
    pub attrs: Attrs,
}

impl ResourceData {
    pub fn new(id: impl Into<String>, attrs: Attrs) -> Self {
        Self {
            id: id.into(),
            attrs,
        }
    }
}

/// Convenience accessors over an attribute map
pub trait AttrsExt {
    fn str_attr(&self, name: &str) -> Option<&str>;
    fn int_attr(&self, name: &str) -> Option<i64>;
    fn bool_attr(&self, name: &str) -> Option<bool>;
    fn strings(&self, name: &str) -> Vec<String>;
}

impl AttrsExt for Attrs {
    fn str_attr(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    fn int_attr(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn bool_attr(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// String elements of a list or set attribute.
    fn strings(&self, name: &str) -> Vec<String> {
        self.get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Build [`Attrs`] from a `json!` object literal.
pub fn attrs(value: Value) -> Attrs {
    match value {
        Value::Object(map) => map,
        _ => Attrs::new(),
    }
}
