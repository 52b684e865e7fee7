//! `cloudfoundry_space_asgs` and `cloudfoundry_default_asg`
//!
//! Both manage only the groups they were given: reads report the bound
//! groups the configuration names, and deletes unbind those alone. An
//! import (no recorded state) reports every bound group.

use super::{recorded_guids, set_delta};
use crate::diff::ChangeSet;
use crate::error::{ProviderError, Result};
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// `current` limited to the recorded groups, when there are any.
async fn managed(
    ctx: &OpContext,
    prior: &Attrs,
    attribute: &str,
    current: Vec<String>,
) -> Result<Vec<String>> {
    if !prior.contains_key(attribute) {
        return Ok(current);
    }
    let recorded = recorded_guids(ctx, prior, attribute, RelationKind::SecurityGroup, None).await?;
    Ok(current.into_iter().filter(|g| recorded.contains(g)).collect())
}

/// Bind what is missing and unbind what was managed but is no longer wanted.
fn binding_delta(current: &[String], managed: &[String], desired: &[String]) -> (Vec<String>, Vec<String>) {
    let (add, _) = set_delta(current, desired);
    let (_, remove) = set_delta(managed, desired);
    (add, remove)
}

fn asg_set(name: &'static str) -> Attribute {
    Attribute::set(name)
        .optional_computed()
        .unmapped()
        .relation(RelationKind::SecurityGroup)
}

pub struct SpaceAsgs {
    schema: Schema,
}

impl SpaceAsgs {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_space_asgs",
                vec![
                    Attribute::string("space")
                        .required()
                        .force_new()
                        .unmapped()
                        .relation(RelationKind::Space),
                    asg_set("running_asgs"),
                    asg_set("staging_asgs"),
                ],
            ),
        }
    }
}

const SPACE_LISTS: [(&str, bool); 2] = [("running_asgs", false), ("staging_asgs", true)];

#[async_trait]
impl Resource for SpaceAsgs {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let space = config.str_attr("space").unwrap_or_default();
        let groups = ctx.client().security_groups();
        for (attribute, staging) in SPACE_LISTS {
            for group in config.strings(attribute) {
                groups.bind_space(&group, space, staging).await?;
            }
        }
        Ok(space.to_string())
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let spaces = ctx.client().spaces();
        let mut state = Attrs::new();
        state.insert("space".into(), json!(id));
        for (attribute, staging) in SPACE_LISTS {
            let current = match spaces.security_groups(id, staging).await {
                Ok(current) => current,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let bound = managed(ctx, prior, attribute, current).await?;
            state.insert(attribute.into(), json!(bound));
        }
        Ok(Some(state))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Attrs,
        config: &Attrs,
        changes: &ChangeSet,
    ) -> Result<()> {
        let spaces = ctx.client().spaces();
        let groups = ctx.client().security_groups();
        for (attribute, staging) in SPACE_LISTS {
            if !changes.has(attribute) {
                continue;
            }
            let current = spaces.security_groups(id, staging).await?;
            let was_managed = managed(ctx, prior, attribute, current.clone()).await?;
            let (add, remove) = binding_delta(&current, &was_managed, &config.strings(attribute));
            for group in add {
                groups.bind_space(&group, id, staging).await?;
            }
            for group in remove {
                groups.unbind_space(&group, id, staging).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, id: &str, state: &Attrs) -> Result<()> {
        let groups = ctx.client().security_groups();
        for (attribute, staging) in SPACE_LISTS {
            for group in recorded_guids(ctx, state, attribute, RelationKind::SecurityGroup, None).await? {
                groups.unbind_space(&group, id, staging).await?;
            }
        }
        info!(space = id, "space security groups unbound");
        Ok(())
    }
}

/// Platform-wide running or staging default groups; the id is the
/// lifecycle name.
pub struct DefaultAsg {
    schema: Schema,
}

fn is_staging(name: &str) -> Result<bool> {
    match name {
        "running" => Ok(false),
        "staging" => Ok(true),
        other => Err(ProviderError::InvalidImportId {
            id: other.to_string(),
            expected: "running or staging".to_string(),
        }),
    }
}

impl DefaultAsg {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_default_asg",
                vec![
                    Attribute::string("name")
                        .required()
                        .force_new()
                        .unmapped()
                        .validate(crate::one_of!("running", "staging")),
                    Attribute::set("asgs")
                        .required()
                        .unmapped()
                        .relation(RelationKind::SecurityGroup),
                ],
            ),
        }
    }
}

#[async_trait]
impl Resource for DefaultAsg {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let name = config.str_attr("name").unwrap_or_default();
        let staging = is_staging(name)?;
        let groups = ctx.client().security_groups();
        for group in config.strings("asgs") {
            groups.bind_default(&group, staging).await?;
        }
        Ok(name.to_string())
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let current = ctx.client().security_groups().defaults(is_staging(id)?).await?;
        let mut state = Attrs::new();
        state.insert("name".into(), json!(id));
        state.insert("asgs".into(), json!(managed(ctx, prior, "asgs", current).await?));
        Ok(Some(state))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Attrs,
        config: &Attrs,
        _changes: &ChangeSet,
    ) -> Result<()> {
        let staging = is_staging(id)?;
        let groups = ctx.client().security_groups();
        let current = groups.defaults(staging).await?;
        let was_managed = managed(ctx, prior, "asgs", current.clone()).await?;
        let (add, remove) = binding_delta(&current, &was_managed, &config.strings("asgs"));
        for group in add {
            groups.bind_default(&group, staging).await?;
        }
        for group in remove {
            groups.unbind_default(&group, staging).await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, id: &str, state: &Attrs) -> Result<()> {
        let staging = is_staging(id)?;
        let groups = ctx.client().security_groups();
        for group in recorded_guids(ctx, state, "asgs", RelationKind::SecurityGroup, None).await? {
            groups.unbind_default(&group, staging).await?;
        }
        Ok(())
    }

    async fn import_id(&self, _ctx: &OpContext, import_id: &str) -> Result<String> {
        is_staging(import_id)?;
        Ok(import_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_binding_delta_leaves_unmanaged_groups() {
        // "ops" is bound by someone else and must survive.
        let current = strings(&["ops", "web"]);
        let managed = strings(&["web"]);
        let (add, remove) = binding_delta(&current, &managed, &strings(&["db"]));
        assert_eq!(add, strings(&["db"]));
        assert_eq!(remove, strings(&["web"]));
    }

    #[test]
    fn test_lifecycle_names() {
        assert!(!is_staging("running").unwrap());
        assert!(is_staging("staging").unwrap());
        assert!(matches!(
            is_staging("both"),
            Err(ProviderError::InvalidImportId { .. })
        ));
    }
}
