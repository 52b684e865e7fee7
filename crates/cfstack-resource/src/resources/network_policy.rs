//! `cloudfoundry_network_policy`
//!
//! A set of container-to-container policies under one provider-generated
//! id. The platform has no id for a policy, so reads match the recorded
//! policies against what the networking API reports.

use crate::diff::ChangeSet;
use crate::error::{ProviderError, Result};
use crate::normalize::Normalize;
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, Schema};
use crate::state::Attrs;
use async_trait::async_trait;
use cfstack_api::resources::NetworkPolicy;
use cfstack_api::resources::network_policies::Ports;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tracing::info;

const DEFAULT_PROTOCOL: &str = "tcp";

pub struct NetworkPolicyResource {
    schema: Schema,
}

impl NetworkPolicyResource {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_network_policy",
                vec![Attribute::block("policy")
                    .required()
                    .unmapped()
                    .normalize(Normalize::SortedSet)
                    .validate(validate_policies)],
            ),
        }
    }
}

/// `8080` or `8080-8090`
fn parse_ports(raw: &str) -> std::result::Result<Ports, String> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u16>()
            .map_err(|_| format!("invalid port {:?}", s))
    };
    let ports = match raw.split_once('-') {
        Some((start, end)) => Ports {
            start: parse(start)?,
            end: parse(end)?,
        },
        None => {
            let port = parse(raw)?;
            Ports {
                start: port,
                end: port,
            }
        }
    };
    if ports.start == 0 || ports.start > ports.end {
        return Err(format!("invalid port range {:?}", raw));
    }
    Ok(ports)
}

fn text<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn to_policy(item: &Value) -> std::result::Result<NetworkPolicy, String> {
    let source = text(item, "source_app").ok_or("source_app is required")?;
    let destination = text(item, "destination_app").ok_or("destination_app is required")?;
    let protocol = text(item, "protocol").unwrap_or(DEFAULT_PROTOCOL);
    if protocol != "tcp" && protocol != "udp" {
        return Err(format!("protocol must be tcp or udp, got {:?}", protocol));
    }
    let port = match item.get("port") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err("port is required".into()),
    };
    Ok(NetworkPolicy::new(source, destination, protocol, parse_ports(&port)?))
}

fn validate_policies(value: &Value) -> std::result::Result<(), String> {
    let items = value.as_array().ok_or("policy must be a list")?;
    for item in items {
        to_policy(item)?;
    }
    Ok(())
}

fn policies(attrs: &Attrs) -> Result<Vec<(Value, NetworkPolicy)>> {
    let items = attrs
        .get("policy")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    items
        .into_iter()
        .map(|item| {
            let policy = to_policy(&item).map_err(ProviderError::invalid_config)?;
            Ok((item, policy))
        })
        .collect()
}

#[async_trait]
impl Resource for NetworkPolicyResource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let wanted: Vec<NetworkPolicy> = policies(config)?.into_iter().map(|(_, p)| p).collect();
        let count = wanted.len();
        ctx.client().network_policies().create(wanted).await?;
        let id = uuid::Uuid::new_v4().to_string();
        info!(id = %id, count, "network policies created");
        Ok(id)
    }

    async fn read(&self, ctx: &OpContext, _id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let recorded = policies(prior)?;
        if recorded.is_empty() {
            return Ok(Some(Attrs::new()));
        }
        let apps: BTreeSet<&str> = recorded
            .iter()
            .flat_map(|(_, p)| [p.source.id.as_str(), p.destination.id.as_str()])
            .collect();
        let apps: Vec<&str> = apps.into_iter().collect();
        let existing = ctx.client().network_policies().list(&apps).await?;

        let present: Vec<Value> = recorded
            .into_iter()
            .filter(|(_, p)| existing.contains(p))
            .map(|(item, _)| item)
            .collect();
        if present.is_empty() {
            return Ok(None);
        }
        let mut state = Attrs::new();
        state.insert("policy".into(), json!(present));
        Ok(Some(state))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        _id: &str,
        prior: &Attrs,
        config: &Attrs,
        _changes: &ChangeSet,
    ) -> Result<()> {
        let before: Vec<NetworkPolicy> = policies(prior)?.into_iter().map(|(_, p)| p).collect();
        let after: Vec<NetworkPolicy> = policies(config)?.into_iter().map(|(_, p)| p).collect();
        let removed: Vec<NetworkPolicy> = before.iter().filter(|p| !after.contains(p)).cloned().collect();
        let added: Vec<NetworkPolicy> = after.iter().filter(|p| !before.contains(p)).cloned().collect();

        let api = ctx.client().network_policies();
        if !removed.is_empty() {
            api.delete(removed).await?;
        }
        if !added.is_empty() {
            api.create(added).await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, _id: &str, state: &Attrs) -> Result<()> {
        let recorded: Vec<NetworkPolicy> = policies(state)?.into_iter().map(|(_, p)| p).collect();
        if !recorded.is_empty() {
            ctx.client().network_policies().delete(recorded).await?;
        }
        Ok(())
    }

    async fn import_id(&self, _ctx: &OpContext, import_id: &str) -> Result<String> {
        Err(ProviderError::InvalidImportId {
            id: import_id.to_string(),
            expected: "nothing: network policies have no platform id to import".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ports() {
        assert_eq!(parse_ports("8080").unwrap(), Ports { start: 8080, end: 8080 });
        assert_eq!(parse_ports("8080-8090").unwrap(), Ports { start: 8080, end: 8090 });
        assert!(parse_ports("9000-8000").is_err());
        assert!(parse_ports("http").is_err());
    }

    #[test]
    fn test_validate_policies() {
        let ok = json!([{"source_app": "a1", "destination_app": "a2", "port": 8080}]);
        assert!(validate_policies(&ok).is_ok());

        let bad = json!([{"source_app": "a1", "destination_app": "a2", "port": "61443", "protocol": "icmp"}]);
        assert!(validate_policies(&bad).unwrap_err().contains("tcp or udp"));
    }
}
