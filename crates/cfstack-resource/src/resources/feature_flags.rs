//! `cloudfoundry_feature_flags`: platform feature flags as
//! `name = "enabled" | "disabled"`. There is one instance per platform
//! (id `config`); deleting it leaves the flags as they are.

use crate::diff::ChangeSet;
use crate::error::{ProviderError, Result};
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, Schema};
use crate::state::Attrs;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::info;

const ID: &str = "config";

fn flag_values(value: &Value) -> std::result::Result<(), String> {
    let Some(flags) = value.as_object() else {
        return Err("must be a map of flag names".into());
    };
    for (name, state) in flags {
        if parse_state(state).is_none() {
            return Err(format!("{}: must be \"enabled\" or \"disabled\"", name));
        }
    }
    Ok(())
}

fn parse_state(value: &Value) -> Option<bool> {
    match value.as_str()? {
        "enabled" => Some(true),
        "disabled" => Some(false),
        _ => None,
    }
}

fn state_name(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}

fn desired(config: &Attrs) -> BTreeMap<String, bool> {
    config
        .get("feature_flags")
        .and_then(Value::as_object)
        .map(|flags| {
            flags
                .iter()
                .filter_map(|(name, v)| parse_state(v).map(|on| (name.clone(), on)))
                .collect()
        })
        .unwrap_or_default()
}

pub struct FeatureFlags {
    schema: Schema,
}

impl FeatureFlags {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_feature_flags",
                vec![
                    Attribute::map("feature_flags")
                        .required()
                        .unmapped()
                        .validate(flag_values),
                ],
            ),
        }
    }

    async fn apply(&self, ctx: &OpContext, wanted: &BTreeMap<String, bool>) -> Result<()> {
        let flags = ctx.client().feature_flags();
        let current = flags.list().await?;
        for (name, enabled) in wanted {
            if !current.contains_key(name) {
                return Err(ProviderError::invalid_config(format!(
                    "feature flag {:?} is not known to the platform",
                    name
                )));
            }
            if current.get(name) != Some(enabled) {
                flags.set(name, *enabled).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Resource for FeatureFlags {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        self.apply(ctx, &desired(config)).await?;
        Ok(ID.to_string())
    }

    /// Configured flags only, or every flag on import.
    async fn read(&self, ctx: &OpContext, _id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let current = ctx.client().feature_flags().list().await?;
        let wanted = desired(prior);
        let reported: Map<String, Value> = current
            .into_iter()
            .filter(|(name, _)| wanted.is_empty() || wanted.contains_key(name))
            .map(|(name, enabled)| (name, json!(state_name(enabled))))
            .collect();
        let mut state = Attrs::new();
        state.insert("feature_flags".into(), Value::Object(reported));
        Ok(Some(state))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        _id: &str,
        _prior: &Attrs,
        config: &Attrs,
        _changes: &ChangeSet,
    ) -> Result<()> {
        self.apply(ctx, &desired(config)).await
    }

    async fn delete(&self, _ctx: &OpContext, _id: &str, _state: &Attrs) -> Result<()> {
        info!("feature flags left in place");
        Ok(())
    }

    async fn import_id(&self, _ctx: &OpContext, _import_id: &str) -> Result<String> {
        Ok(ID.to_string())
    }
}
