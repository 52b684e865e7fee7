//! Generic entity ↔ attribute mapping driven by the schema table

use crate::schema::Schema;
use crate::state::Attrs;
use serde_json::{Map, Value};

/// Value at a dotted path such as `last_operation.state`.
pub fn get_path<'a>(entity: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(entity, |current, key| current.get(key))
}

/// Set a dotted path, creating intermediate objects.
pub fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else { return };
    let mut current = target;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else { return };
        current = next;
    }
    current.insert(last.to_string(), value);
}

/// Observed attributes of every mapped field, normalized.
///
/// Local attributes are copied from `prior` since the platform never
/// reports them.
pub fn to_state(schema: &Schema, entity: &Value, prior: &Attrs) -> Attrs {
    let mut out = Attrs::new();
    for attr in &schema.attributes {
        if attr.local {
            if let Some(value) = prior.get(attr.name) {
                out.insert(attr.name.to_string(), value.clone());
            }
            continue;
        }
        let Some(field) = attr.field else { continue };
        let value = get_path(entity, field).cloned().unwrap_or(Value::Null);
        let value = attr.normalize.apply(&value).unwrap_or(value);
        out.insert(attr.name.to_string(), value);
    }
    out
}

/// Request body holding the mapped attributes of `config`.
///
/// With `only`, attributes outside the list are left out so updates carry
/// just what changed. Unset attributes are never sent.
pub fn to_body(schema: &Schema, config: &Attrs, only: Option<&[String]>) -> Map<String, Value> {
    let mut body = Map::new();
    for attr in &schema.attributes {
        let Some(field) = attr.field else { continue };
        if attr.is_computed_only() {
            continue;
        }
        if let Some(only) = only
            && !only.iter().any(|name| name == attr.name)
        {
            continue;
        }
        let Some(value) = config.get(attr.name).filter(|v| !v.is_null()) else {
            continue;
        };
        let value = attr.normalize.apply(value).unwrap_or_else(|_| value.clone());
        set_path(&mut body, field, value);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Normalize;
    use crate::schema::Attribute;
    use crate::state::attrs;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(
            "cloudfoundry_thing",
            vec![
                Attribute::string("name").required(),
                Attribute::int("memory").normalize(Normalize::MemoryMb),
                Attribute::string("state").field("last_operation.state").computed(),
                Attribute::string("path").local(),
                Attribute::set("tags"),
            ],
        )
    }

    #[test]
    fn test_to_state() {
        let entity = json!({
            "name": "web",
            "memory": 256,
            "last_operation": {"state": "succeeded"},
            "tags": ["b", "a"],
        });
        let prior = attrs(json!({"path": "./app"}));
        let state = to_state(&schema(), &entity, &prior);
        assert_eq!(state["name"], json!("web"));
        assert_eq!(state["state"], json!("succeeded"));
        assert_eq!(state["path"], json!("./app"));
        assert_eq!(state["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_to_body_only_changed() {
        let config = attrs(json!({"name": "web", "memory": "1G", "path": "./app"}));
        let full = to_body(&schema(), &config, None);
        assert_eq!(Value::Object(full), json!({"name": "web", "memory": 1024}));

        let only = vec!["memory".to_string()];
        let partial = to_body(&schema(), &config, Some(&only));
        assert_eq!(Value::Object(partial), json!({"memory": 1024}));
    }

    #[test]
    fn test_set_path_nested() {
        let mut body = Map::new();
        set_path(&mut body, "a.b.c", json!(1));
        set_path(&mut body, "a.d", json!(2));
        assert_eq!(Value::Object(body), json!({"a": {"b": {"c": 1}, "d": 2}}));
    }
}
