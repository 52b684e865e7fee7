//! Name-or-guid references between entities
//!
//! Lookups are memoized for the lifetime of one operation only.

use crate::error::{ProviderError, Result};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::Attrs;
use cfstack_api::pagination::{self, V2};
use cfstack_api::resources::V2Collection;
use cfstack_api::{CfClient, V2Query};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use tracing::debug;

pub fn is_guid(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .unwrap_or_else(|e| panic!("guid pattern: {e}"))
    })
    .is_match(value)
}

type Key = (RelationKind, Option<String>, String);

/// Lookup failure before it is tied to an attribute
enum Miss {
    NotFound,
    Ambiguous(usize),
}

pub struct Resolver {
    client: CfClient,
    memo: Mutex<HashMap<Key, String>>,
}

impl Resolver {
    pub fn new(client: &CfClient) -> Self {
        Self {
            client: client.clone(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    fn remembered(&self, key: &Key) -> Option<String> {
        self.memo.lock().ok()?.get(key).cloned()
    }

    fn remember(&self, key: Key, guid: &str) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(key, guid.to_string());
        }
    }

    /// Guid for `value`, which may already be one.
    pub async fn resolve(
        &self,
        attribute: &str,
        kind: RelationKind,
        value: &str,
        scope: Option<&str>,
    ) -> Result<String> {
        if is_guid(value) {
            return Ok(value.to_string());
        }
        let key = (kind, scope.map(String::from), value.to_string());
        if let Some(guid) = self.remembered(&key) {
            return Ok(guid);
        }

        let found = self.lookup(kind, value, scope).await?;
        match found {
            Ok(guid) => {
                debug!(kind = kind.as_str(), name = value, guid = %guid, "resolved reference");
                self.remember(key, &guid);
                Ok(guid)
            }
            Err(miss) => Err(ProviderError::InvalidRelation {
                attribute: attribute.to_string(),
                value: value.to_string(),
                message: match miss {
                    Miss::NotFound => format!("no {} with that name", kind.as_str()),
                    Miss::Ambiguous(n) => {
                        format!("{} {}s share that name", n, kind.as_str())
                    }
                },
            }),
        }
    }

    async fn lookup(
        &self,
        kind: RelationKind,
        name: &str,
        scope: Option<&str>,
    ) -> Result<std::result::Result<String, Miss>> {
        let client = &self.client;
        let scoped = |field: &str| match scope {
            Some(guid) => V2Query::new().eq(field, guid),
            None => V2Query::new(),
        };
        Ok(match kind {
            RelationKind::Org => unique(&client.organizations(), name, V2Query::new()).await?,
            RelationKind::Space => unique(&client.spaces(), name, scoped("organization_guid")).await?,
            RelationKind::OrgQuota => unique(&client.org_quotas(), name, V2Query::new()).await?,
            RelationKind::SpaceQuota => {
                unique(&client.space_quotas(), name, scoped("organization_guid")).await?
            }
            RelationKind::Stack => unique(&client.stacks(), name, V2Query::new()).await?,
            RelationKind::App => unique(&client.apps(), name, scoped("space_guid")).await?,
            RelationKind::ServiceBroker => {
                unique(&client.service_brokers(), name, V2Query::new()).await?
            }
            RelationKind::SecurityGroup => {
                unique(&client.security_groups(), name, V2Query::new()).await?
            }
            RelationKind::ServiceInstance => {
                match unique(&client.service_instances(), name, scoped("space_guid")).await? {
                    Err(Miss::NotFound) => {
                        unique(&client.user_provided_services(), name, scoped("space_guid")).await?
                    }
                    found => found,
                }
            }
            RelationKind::Domain => match client.domains().find_by_name(name).await? {
                Some((_, domain)) => Ok(domain.metadata.guid),
                None => Err(Miss::NotFound),
            },
            RelationKind::ServicePlan => {
                let Some((service, plan)) = name.split_once('/') else {
                    return Ok(Err(Miss::NotFound));
                };
                match client.service_plans().find_plan(service, plan, scope).await? {
                    Some(plan) => Ok(plan.metadata.guid),
                    None => Err(Miss::NotFound),
                }
            }
            RelationKind::IsolationSegment => {
                match client.isolation_segments().find_by_name(name).await? {
                    Some(segment) => segment
                        .get("guid")
                        .and_then(Value::as_str)
                        .map(String::from)
                        .ok_or(Miss::NotFound),
                    None => Err(Miss::NotFound),
                }
            }
            RelationKind::User => match client.users().find_scim(name, None).await? {
                Some(user) => user
                    .get("id")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .ok_or(Miss::NotFound),
                None => Err(Miss::NotFound),
            },
        })
    }

    fn scope_of<'a>(attr: &Attribute, attrs: &'a Attrs) -> Option<&'a str> {
        let scope = attr.relation?.scope?;
        attrs.get(scope).and_then(Value::as_str)
    }

    /// Copy of `config` with every relation attribute replaced by guids.
    ///
    /// Unscoped relations are resolved first so scoped ones can use their
    /// guids.
    pub async fn resolve_config(&self, schema: &Schema, config: &Attrs) -> Result<Attrs> {
        let mut out = config.clone();
        let (unscoped, scoped): (Vec<&Attribute>, Vec<&Attribute>) = schema
            .attributes
            .iter()
            .filter(|a| a.relation.is_some())
            .partition(|a| a.relation.is_some_and(|r| r.scope.is_none()));

        for attr in unscoped.into_iter().chain(scoped) {
            let Some(relation) = attr.relation else { continue };
            let scope = Self::scope_of(attr, &out).map(String::from);
            let resolved = match out.get(attr.name) {
                Some(Value::String(value)) if !value.is_empty() => Value::String(
                    self.resolve(attr.name, relation.kind, value, scope.as_deref())
                        .await?,
                ),
                Some(Value::Array(values)) => {
                    let mut guids = Vec::with_capacity(values.len());
                    for value in values {
                        let Some(value) = value.as_str() else { continue };
                        guids.push(Value::String(
                            self.resolve(attr.name, relation.kind, value, scope.as_deref())
                                .await?,
                        ));
                    }
                    Value::Array(guids)
                }
                _ => continue,
            };
            out.insert(attr.name.to_string(), resolved);
        }
        Ok(out)
    }

    /// Keep the configured spelling of each reference while it still
    /// resolves to what the platform reports; otherwise leave the observed
    /// guid in place.
    pub async fn keep_references(&self, schema: &Schema, configured: &Attrs, observed: &mut Attrs) {
        let reported = observed.clone();
        for attr in &schema.attributes {
            let Some(relation) = attr.relation else { continue };
            let (Some(wanted), Some(actual)) = (configured.get(attr.name), observed.get(attr.name))
            else {
                continue;
            };
            if wanted == actual {
                continue;
            }
            let scope = Self::scope_of(attr, &reported).map(String::from);
            let keep = match (wanted, actual) {
                (Value::String(name), Value::String(guid)) => self
                    .resolve(attr.name, relation.kind, name, scope.as_deref())
                    .await
                    .is_ok_and(|g| &g == guid),
                (Value::Array(names), Value::Array(guids)) => {
                    let mut resolved = Vec::with_capacity(names.len());
                    for name in names.iter().filter_map(Value::as_str) {
                        match self
                            .resolve(attr.name, relation.kind, name, scope.as_deref())
                            .await
                        {
                            Ok(guid) => resolved.push(guid),
                            Err(_) => break,
                        }
                    }
                    let mut actual: Vec<&str> = guids.iter().filter_map(Value::as_str).collect();
                    resolved.sort();
                    resolved.dedup();
                    actual.sort();
                    actual.dedup();
                    resolved == actual
                }
                _ => false,
            };
            if keep {
                observed.insert(attr.name.to_string(), wanted.clone());
            }
        }
    }
}

/// The single entity named `name` within `scope`.
async fn unique(
    collection: &V2Collection,
    name: &str,
    scope: V2Query,
) -> Result<std::result::Result<String, Miss>> {
    let matches: Vec<V2<Value>> =
        pagination::collect_all(collection.list(scope.eq("name", name))).await?;
    let mut exact = matches
        .into_iter()
        .filter(|e| e.str_field("name") == Some(name))
        .map(|e| e.metadata.guid);
    Ok(match (exact.next(), exact.next()) {
        (Some(guid), None) => Ok(guid),
        (None, _) => Err(Miss::NotFound),
        (Some(_), Some(_)) => Err(Miss::Ambiguous(2 + exact.count())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use crate::state::attrs;
    use cfstack_api::testing::{FakePlatform, client_for};
    use serde_json::json;

    const ORG: &str = "5f0c6a8e-1c2b-4d3e-9f4a-0b1c2d3e4f50";

    fn list(items: &[(&str, &str)]) -> Value {
        let resources: Vec<Value> = items
            .iter()
            .map(|(guid, name)| json!({"metadata": {"guid": guid}, "entity": {"name": name}}))
            .collect();
        json!({"total_results": resources.len(), "next_url": null, "resources": resources})
    }

    #[test]
    fn test_is_guid() {
        assert!(is_guid(ORG));
        assert!(!is_guid("acme"));
        assert!(!is_guid("5f0c6a8e-1c2b"));
    }

    #[tokio::test]
    async fn test_resolve_memoized() {
        let fake = FakePlatform::with_defaults();
        fake.respond("GET", "/v2/organizations?q=name:acme", 200, list(&[(ORG, "acme")]));
        let client = client_for(&fake).await;
        let resolver = Resolver::new(&client);

        for _ in 0..3 {
            let guid = resolver.resolve("org", RelationKind::Org, "acme", None).await.unwrap();
            assert_eq!(guid, ORG);
        }
        assert_eq!(fake.count("GET", "/v2/organizations"), 1);

        let guid = resolver.resolve("org", RelationKind::Org, ORG, None).await.unwrap();
        assert_eq!(guid, ORG);
        assert_eq!(fake.count("GET", "/v2/organizations"), 1);
    }

    #[tokio::test]
    async fn test_unknown_name_is_invalid_relation() {
        let fake = FakePlatform::with_defaults();
        fake.respond("GET", "/v2/organizations?q=name:nope", 200, list(&[]));
        let client = client_for(&fake).await;

        let err = Resolver::new(&client)
            .resolve("org", RelationKind::Org, "nope", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRelation { ref attribute, .. } if attribute == "org"));
    }

    #[tokio::test]
    async fn test_ambiguous_space() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            "/v2/spaces?q=name:dev",
            200,
            list(&[("s1", "dev"), ("s2", "dev")]),
        );
        let client = client_for(&fake).await;

        let err = Resolver::new(&client)
            .resolve("space", RelationKind::Space, "dev", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 spaces share that name"));
    }

    #[tokio::test]
    async fn test_scoped_resolution_and_kept_reference() {
        let fake = FakePlatform::with_defaults();
        fake.respond("GET", "/v2/organizations?q=name:acme", 200, list(&[(ORG, "acme")]));
        fake.respond(
            "GET",
            &format!("/v2/space_quota_definitions?q=organization_guid:{ORG};name:small"),
            200,
            list(&[("sq1", "small")]),
        );
        let client = client_for(&fake).await;
        let resolver = Resolver::new(&client);
        let schema = Schema::new(
            "cloudfoundry_thing",
            vec![
                Attribute::string("org").relation(RelationKind::Org),
                Attribute::string("quota").relation_in(RelationKind::SpaceQuota, "org"),
            ],
        );

        let config = attrs(json!({"org": "acme", "quota": "small"}));
        let resolved = resolver.resolve_config(&schema, &config).await.unwrap();
        assert_eq!(resolved["org"], json!(ORG));
        assert_eq!(resolved["quota"], json!("sq1"));

        let mut observed = attrs(json!({"org": ORG, "quota": "sq1"}));
        resolver.keep_references(&schema, &config, &mut observed).await;
        assert_eq!(observed, config);

        let mut moved = attrs(json!({"org": ORG, "quota": "sq9"}));
        resolver.keep_references(&schema, &config, &mut moved).await;
        assert_eq!(moved["org"], json!("acme"));
        assert_eq!(moved["quota"], json!("sq9"));
    }
}
