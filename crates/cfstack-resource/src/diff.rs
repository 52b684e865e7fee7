//! Change detection between recorded state and configuration

use crate::schema::{AttrType, Attribute, Schema};
use crate::state::Attrs;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Planned action for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update in place
    Update,
    /// Destroy and create again
    Replace,
    /// Delete a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Attributes whose configured value differs from the recorded one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub changed: Vec<String>,
    /// Subset of `changed` that cannot be updated in place
    pub replace: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn has(&self, name: &str) -> bool {
        self.changed.iter().any(|c| c == name)
    }

    pub fn any(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.has(n))
    }

    pub fn requires_replace(&self) -> bool {
        !self.replace.is_empty()
    }

    pub fn action(&self) -> ActionType {
        if self.requires_replace() {
            ActionType::Replace
        } else if self.is_empty() {
            ActionType::NoOp
        } else {
            ActionType::Update
        }
    }
}

/// Result of a drift check, reported to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanResult {
    pub action: ActionType,
    pub attributes: Vec<String>,
}

impl PlanResult {
    pub fn create() -> Self {
        Self {
            action: ActionType::Create,
            attributes: Vec::new(),
        }
    }
}

impl From<&ChangeSet> for PlanResult {
    fn from(changes: &ChangeSet) -> Self {
        let action = changes.action();
        let attributes = if action == ActionType::Replace {
            changes.replace.clone()
        } else {
            changes.changed.clone()
        };
        Self { action, attributes }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Comparable form of a value.
fn canonical(attr: &Attribute, value: &Value) -> Value {
    let value = attr.normalize.apply(value).unwrap_or_else(|_| value.clone());
    match (attr.ty, &value) {
        (AttrType::Int, Value::String(s)) => s.trim().parse::<i64>().map(Value::from).unwrap_or(value),
        (AttrType::Bool, Value::String(s)) => s.parse::<bool>().map(Value::from).unwrap_or(value),
        _ => value,
    }
}

fn differs(attr: &Attribute, observed: &Value, desired: &Value) -> bool {
    if is_empty(observed) && is_empty(desired) {
        return false;
    }
    canonical(attr, observed) != canonical(attr, desired)
}

/// Compare configuration (defaults applied) against the recorded state.
///
/// Unset attributes the platform may default are not compared.
pub fn diff(schema: &Schema, prior: &Attrs, config: &Attrs) -> ChangeSet {
    let config = schema.with_defaults(config);
    let mut changes = ChangeSet::default();
    for attr in &schema.attributes {
        if attr.is_computed_only() {
            continue;
        }
        let desired = config.get(attr.name).cloned().unwrap_or(Value::Null);
        if desired.is_null() && attr.platform_default() {
            continue;
        }
        let observed = prior.get(attr.name).cloned().unwrap_or(Value::Null);
        if differs(attr, &observed, &desired) {
            changes.changed.push(attr.name.to_string());
            if attr.force_new {
                changes.replace.push(attr.name.to_string());
            }
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Normalize;
    use crate::state::attrs;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(
            "cloudfoundry_thing",
            vec![
                Attribute::string("name").required(),
                Attribute::string("space").required().force_new(),
                Attribute::int("memory")
                    .normalize(Normalize::MemoryMb)
                    .optional_computed(),
                Attribute::int("instances").default(json!(1)),
                Attribute::set("tags"),
                Attribute::string("guid").computed(),
            ],
        )
    }

    #[test]
    fn test_same_state_no_changes() {
        let state = attrs(json!({
            "name": "web", "space": "s1", "memory": 512, "instances": 1, "tags": ["a", "b"], "guid": "g",
        }));
        let config = attrs(json!({"name": "web", "space": "s1", "memory": "512M", "tags": ["b", "a"]}));
        let changes = diff(&schema(), &state, &config);
        assert!(changes.is_empty(), "{:?}", changes);
        assert_eq!(changes.action(), ActionType::NoOp);
    }

    #[test]
    fn test_memory_drift_is_update() {
        let state = attrs(json!({"name": "web", "space": "s1", "memory": 512, "instances": 1}));
        let config = attrs(json!({"name": "web", "space": "s1", "memory": 256}));
        let changes = diff(&schema(), &state, &config);
        assert_eq!(changes.changed, vec!["memory"]);
        assert_eq!(PlanResult::from(&changes).action, ActionType::Update);
    }

    #[test]
    fn test_force_new_is_replace() {
        let state = attrs(json!({"name": "web", "space": "s1", "instances": 1}));
        let config = attrs(json!({"name": "web", "space": "s2"}));
        let plan = PlanResult::from(&diff(&schema(), &state, &config));
        assert_eq!(plan.action, ActionType::Replace);
        assert_eq!(plan.attributes, vec!["space"]);
    }

    #[test]
    fn test_unset_optional_computed_ignored_but_removed_set_detected() {
        let state = attrs(json!({"name": "web", "space": "s1", "memory": 1024, "instances": 1, "tags": ["a"]}));
        let config = attrs(json!({"name": "web", "space": "s1"}));
        let changes = diff(&schema(), &state, &config);
        assert_eq!(changes.changed, vec!["tags"]);
    }
}
