//! Declarative attribute tables
//!
//! Every resource kind and data source describes its attributes once; the
//! mapper, the drift check, validation and the host-facing schema all read
//! the same table.

use crate::error::{ProviderError, Result};
use crate::normalize::Normalize;
use crate::state::Attrs;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    String,
    Int,
    Bool,
    List,
    Set,
    Map,
    /// List of nested objects
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Required,
    Optional,
    /// Set by the platform only
    Computed,
    /// Platform default unless configured
    OptionalComputed,
}

/// Entity kinds an attribute can reference by name or guid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Org,
    Space,
    Domain,
    OrgQuota,
    SpaceQuota,
    Stack,
    App,
    ServiceInstance,
    /// `service/plan` or a plan guid
    ServicePlan,
    ServiceBroker,
    SecurityGroup,
    IsolationSegment,
    User,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Org => "org",
            RelationKind::Space => "space",
            RelationKind::Domain => "domain",
            RelationKind::OrgQuota => "org quota",
            RelationKind::SpaceQuota => "space quota",
            RelationKind::Stack => "stack",
            RelationKind::App => "app",
            RelationKind::ServiceInstance => "service instance",
            RelationKind::ServicePlan => "service plan",
            RelationKind::ServiceBroker => "service broker",
            RelationKind::SecurityGroup => "security group",
            RelationKind::IsolationSegment => "isolation segment",
            RelationKind::User => "user",
        }
    }
}

/// Reference to another entity, optionally looked up within the entity
/// named by a sibling attribute (e.g. a space within `org`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub kind: RelationKind,
    pub scope: Option<&'static str>,
}

pub type Validator = fn(&Value) -> std::result::Result<(), String>;

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: &'static str,
    pub ty: AttrType,
    pub presence: Presence,
    pub default: Option<Value>,
    pub force_new: bool,
    pub sensitive: bool,
    /// Dotted path of the remote field; `None` when the kind maps it itself.
    pub field: Option<&'static str>,
    /// Never read back from the platform; state keeps the configured value.
    pub local: bool,
    pub normalize: Normalize,
    pub relation: Option<Relation>,
    pub validate: Option<Validator>,
}

impl Attribute {
    fn new(name: &'static str, ty: AttrType) -> Self {
        Self {
            name,
            ty,
            presence: Presence::Optional,
            default: None,
            force_new: false,
            sensitive: false,
            field: Some(name),
            local: false,
            normalize: if ty == AttrType::Set {
                Normalize::SortedSet
            } else {
                Normalize::None
            },
            relation: None,
            validate: None,
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, AttrType::String)
    }

    pub fn int(name: &'static str) -> Self {
        Self::new(name, AttrType::Int)
    }

    pub fn bool(name: &'static str) -> Self {
        Self::new(name, AttrType::Bool).normalize(Normalize::Bool)
    }

    pub fn list(name: &'static str) -> Self {
        Self::new(name, AttrType::List)
    }

    pub fn set(name: &'static str) -> Self {
        Self::new(name, AttrType::Set)
    }

    pub fn map(name: &'static str) -> Self {
        Self::new(name, AttrType::Map)
    }

    pub fn block(name: &'static str) -> Self {
        Self::new(name, AttrType::Block)
    }

    pub fn required(mut self) -> Self {
        self.presence = Presence::Required;
        self
    }

    pub fn computed(mut self) -> Self {
        self.presence = Presence::Computed;
        self
    }

    pub fn optional_computed(mut self) -> Self {
        self.presence = Presence::OptionalComputed;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn field(mut self, path: &'static str) -> Self {
        self.field = Some(path);
        self
    }

    /// Mapped by the kind's own code.
    pub fn unmapped(mut self) -> Self {
        self.field = None;
        self
    }

    pub fn local(mut self) -> Self {
        self.field = None;
        self.local = true;
        self
    }

    pub fn normalize(mut self, normalize: Normalize) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn relation(mut self, kind: RelationKind) -> Self {
        self.relation = Some(Relation { kind, scope: None });
        self
    }

    pub fn relation_in(mut self, kind: RelationKind, scope: &'static str) -> Self {
        self.relation = Some(Relation {
            kind,
            scope: Some(scope),
        });
        self
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validate = Some(validator);
        self
    }

    pub fn is_computed_only(&self) -> bool {
        self.presence == Presence::Computed
    }

    /// Whether the host may leave this attribute to the platform.
    pub fn platform_default(&self) -> bool {
        matches!(self.presence, Presence::Computed | Presence::OptionalComputed)
    }

    fn type_matches(&self, value: &Value) -> bool {
        match self.ty {
            AttrType::String => value.is_string(),
            AttrType::Int => value.is_i64() || value.is_u64() || value.is_string(),
            AttrType::Bool => value.is_boolean() || value.is_string(),
            AttrType::List | AttrType::Set | AttrType::Block => value.is_array(),
            AttrType::Map => value.is_object(),
        }
    }
}

/// Attribute table of one resource kind or data source
#[derive(Debug, Clone)]
pub struct Schema {
    pub type_name: &'static str,
    pub attributes: Vec<Attribute>,
}

impl Schema {
    pub fn new(type_name: &'static str, attributes: Vec<Attribute>) -> Self {
        Self {
            type_name,
            attributes,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Check a configuration before any call is made.
    pub fn validate(&self, config: &Attrs) -> Result<()> {
        for key in config.keys() {
            if key != "id" && self.attribute(key).is_none() {
                return Err(ProviderError::invalid_config(format!(
                    "{}: unsupported attribute {:?}",
                    self.type_name, key
                )));
            }
        }
        for attr in &self.attributes {
            let value = config.get(attr.name).filter(|v| !v.is_null());
            match (attr.presence, value) {
                (Presence::Required, None) => {
                    return Err(ProviderError::invalid_config(format!(
                        "{}: {} is required",
                        self.type_name, attr.name
                    )));
                }
                (Presence::Computed, Some(_)) => {
                    return Err(ProviderError::invalid_config(format!(
                        "{}: {} is computed and cannot be set",
                        self.type_name, attr.name
                    )));
                }
                _ => {}
            }
            let Some(value) = value else { continue };
            if !attr.type_matches(value) {
                return Err(ProviderError::invalid_config(format!(
                    "{}: {} must be a {:?}",
                    self.type_name, attr.name, attr.ty
                )));
            }
            attr.normalize.apply(value).map_err(|e| {
                ProviderError::invalid_config(format!("{}: {}: {}", self.type_name, attr.name, e))
            })?;
            if let Some(validate) = attr.validate {
                validate(value).map_err(|e| {
                    ProviderError::invalid_config(format!(
                        "{}: {}: {}",
                        self.type_name, attr.name, e
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Fill defaults for attributes the configuration leaves unset.
    pub fn with_defaults(&self, config: &Attrs) -> Attrs {
        let mut out = config.clone();
        for attr in &self.attributes {
            if let Some(default) = &attr.default
                && out.get(attr.name).is_none_or(Value::is_null)
            {
                out.insert(attr.name.to_string(), default.clone());
            }
        }
        out
    }

    /// Normalize every known attribute; values that fail normalization are
    /// kept as they are.
    pub fn normalized(&self, attrs: &Attrs) -> Attrs {
        let mut out = attrs.clone();
        for attr in &self.attributes {
            if let Some(value) = out.get_mut(attr.name)
                && let Ok(normalized) = attr.normalize.apply(value)
            {
                *value = normalized;
            }
        }
        out
    }

    /// Host-facing description of the table.
    pub fn to_json(&self) -> Value {
        let attributes: Vec<Value> = self
            .attributes
            .iter()
            .map(|a| {
                json!({
                    "name": a.name,
                    "type": a.ty,
                    "presence": a.presence,
                    "default": a.default,
                    "force_new": a.force_new,
                    "sensitive": a.sensitive,
                    "relation": a.relation.map(|r| r.kind),
                })
            })
            .collect();
        json!({ "type_name": self.type_name, "attributes": attributes })
    }
}

/// Accepts only the listed string values.
#[macro_export]
macro_rules! one_of {
    ($($allowed:literal),+ $(,)?) => {{
        fn check(value: &serde_json::Value) -> std::result::Result<(), String> {
            const ALLOWED: &[&str] = &[$($allowed),+];
            match value.as_str() {
                Some(s) if ALLOWED.contains(&s) => Ok(()),
                _ => Err(format!("must be one of {}", ALLOWED.join(", "))),
            }
        }
        check as $crate::schema::Validator
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(
            "cloudfoundry_thing",
            vec![
                Attribute::string("name").required(),
                Attribute::string("memory").normalize(Normalize::MemoryMb),
                Attribute::bool("allow_ssh").default(json!(true)),
                Attribute::string("kind").validate(crate::one_of!("a", "b")),
                Attribute::string("guid_only").computed(),
            ],
        )
    }

    fn attrs(value: Value) -> Attrs {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate() {
        let schema = schema();
        schema.validate(&attrs(json!({"name": "x", "memory": "1G"}))).unwrap();

        let missing = schema.validate(&attrs(json!({"memory": "1G"}))).unwrap_err();
        assert!(missing.to_string().contains("name is required"));

        let unknown = schema.validate(&attrs(json!({"name": "x", "colour": "red"}))).unwrap_err();
        assert!(unknown.to_string().contains("unsupported attribute"));

        let computed = schema.validate(&attrs(json!({"name": "x", "guid_only": "g"}))).unwrap_err();
        assert!(computed.to_string().contains("computed"));

        assert!(schema.validate(&attrs(json!({"name": "x", "memory": "lots"}))).is_err());
        assert!(schema.validate(&attrs(json!({"name": "x", "kind": "c"}))).is_err());
    }

    #[test]
    fn test_defaults_and_normalization() {
        let schema = schema();
        let out = schema.normalized(&schema.with_defaults(&attrs(json!({"name": "x", "memory": "1G"}))));
        assert_eq!(out["allow_ssh"], json!(true));
        assert_eq!(out["memory"], json!(1024));
    }
}
