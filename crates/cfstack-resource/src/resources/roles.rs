//! `cloudfoundry_org_role` and `cloudfoundry_space_role`
//!
//! One role edge each; ids are `org_guid:user_guid:role` and
//! `space_guid:user_guid:role`.

use super::found;
use crate::diff::ChangeSet;
use crate::error::{ProviderError, Result};
use crate::resource::{OpContext, Resource, split_key};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use cfstack_api::resources::{OrgRole, SpaceRole};
use serde_json::json;
use std::str::FromStr;

/// Replace `role` with its canonical spelling.
fn canonical_role<R>(mut config: Attrs, canonical: impl Fn(R) -> &'static str) -> Result<Attrs>
where
    R: FromStr<Err = String>,
{
    if let Some(raw) = config.str_attr("role") {
        let role = R::from_str(raw).map_err(ProviderError::invalid_config)?;
        config.insert("role".into(), json!(canonical(role)));
    }
    Ok(config)
}

fn edge_state(parent_attr: &str, parent: &str, user: &str, role: &str) -> Attrs {
    let mut state = Attrs::new();
    state.insert(parent_attr.into(), json!(parent));
    state.insert("user".into(), json!(user));
    state.insert("role".into(), json!(role));
    state
}

fn edge_schema(type_name: &'static str, parent_attr: &'static str, parent: RelationKind) -> Schema {
    Schema::new(
        type_name,
        vec![
            Attribute::string(parent_attr)
                .required()
                .force_new()
                .unmapped()
                .relation(parent),
            Attribute::string("user")
                .required()
                .force_new()
                .unmapped()
                .relation(RelationKind::User),
            Attribute::string("role").required().force_new().unmapped(),
        ],
    )
}

pub struct OrgRoleEdge {
    schema: Schema,
}

const ORG_KEY: &str = "org_guid:user_guid:role";

impl OrgRoleEdge {
    pub fn new() -> Self {
        Self {
            schema: edge_schema("cloudfoundry_org_role", "org", RelationKind::Org),
        }
    }

    fn parse(id: &str) -> Result<(String, String, OrgRole)> {
        let key = split_key(id, 3, ORG_KEY)?;
        let role = OrgRole::from_str(key[2]).map_err(|_| ProviderError::InvalidImportId {
            id: id.to_string(),
            expected: ORG_KEY.to_string(),
        })?;
        Ok((key[0].to_string(), key[1].to_string(), role))
    }
}

#[async_trait]
impl Resource for OrgRoleEdge {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn prepare(&self, _ctx: &OpContext, config: Attrs) -> Result<Attrs> {
        canonical_role::<OrgRole>(config, |r| r.as_str())
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let org = config.str_attr("org").unwrap_or_default();
        let user = config.str_attr("user").unwrap_or_default();
        let role = OrgRole::from_str(config.str_attr("role").unwrap_or_default())
            .map_err(ProviderError::invalid_config)?;
        ctx.client()
            .organizations()
            .associate_role(org, role, user)
            .await?;
        Ok(format!("{}:{}:{}", org, user, role))
    }

    async fn read(&self, ctx: &OpContext, id: &str, _prior: &Attrs) -> Result<Option<Attrs>> {
        let (org, user, role) = Self::parse(id)?;
        let members = found(ctx.client().organizations().role_members(&org, role).await)?;
        if !members.is_some_and(|m| m.contains(&user)) {
            return Ok(None);
        }
        Ok(Some(edge_state("org", &org, &user, role.as_str())))
    }

    async fn update(
        &self,
        _ctx: &OpContext,
        _id: &str,
        _prior: &Attrs,
        _config: &Attrs,
        _changes: &ChangeSet,
    ) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Attrs) -> Result<()> {
        let (org, user, role) = Self::parse(id)?;
        ctx.client()
            .organizations()
            .remove_role(&org, role, &user)
            .await?;
        Ok(())
    }

    async fn import_id(&self, _ctx: &OpContext, import_id: &str) -> Result<String> {
        let (org, user, role) = Self::parse(import_id)?;
        Ok(format!("{}:{}:{}", org, user, role))
    }
}

pub struct SpaceRoleEdge {
    schema: Schema,
}

const SPACE_KEY: &str = "space_guid:user_guid:role";

impl SpaceRoleEdge {
    pub fn new() -> Self {
        Self {
            schema: edge_schema("cloudfoundry_space_role", "space", RelationKind::Space),
        }
    }

    fn parse(id: &str) -> Result<(String, String, SpaceRole)> {
        let key = split_key(id, 3, SPACE_KEY)?;
        let role = SpaceRole::from_str(key[2]).map_err(|_| ProviderError::InvalidImportId {
            id: id.to_string(),
            expected: SPACE_KEY.to_string(),
        })?;
        Ok((key[0].to_string(), key[1].to_string(), role))
    }
}

#[async_trait]
impl Resource for SpaceRoleEdge {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn prepare(&self, _ctx: &OpContext, config: Attrs) -> Result<Attrs> {
        canonical_role::<SpaceRole>(config, |r| r.as_str())
    }

    /// Org membership is granted first; the platform requires it.
    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let space = config.str_attr("space").unwrap_or_default();
        let user = config.str_attr("user").unwrap_or_default();
        let role = SpaceRole::from_str(config.str_attr("role").unwrap_or_default())
            .map_err(ProviderError::invalid_config)?;

        let entity = ctx.client().spaces().get(space).await?;
        if let Some(org) = entity.str_field("organization_guid") {
            ctx.client()
                .organizations()
                .associate_role(org, OrgRole::User, user)
                .await?;
        }
        ctx.client().spaces().associate_role(space, role, user).await?;
        Ok(format!("{}:{}:{}", space, user, role))
    }

    async fn read(&self, ctx: &OpContext, id: &str, _prior: &Attrs) -> Result<Option<Attrs>> {
        let (space, user, role) = Self::parse(id)?;
        let members = found(ctx.client().spaces().role_members(&space, role).await)?;
        if !members.is_some_and(|m| m.contains(&user)) {
            return Ok(None);
        }
        Ok(Some(edge_state("space", &space, &user, role.as_str())))
    }

    async fn update(
        &self,
        _ctx: &OpContext,
        _id: &str,
        _prior: &Attrs,
        _config: &Attrs,
        _changes: &ChangeSet,
    ) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Attrs) -> Result<()> {
        let (space, user, role) = Self::parse(id)?;
        ctx.client().spaces().remove_role(&space, role, &user).await?;
        Ok(())
    }

    async fn import_id(&self, _ctx: &OpContext, import_id: &str) -> Result<String> {
        let (space, user, role) = Self::parse(import_id)?;
        Ok(format!("{}:{}:{}", space, user, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::attrs;

    #[test]
    fn test_parse_edge_key() {
        let (org, user, role) = OrgRoleEdge::parse("o1:u1:managers").unwrap();
        assert_eq!((org.as_str(), user.as_str(), role), ("o1", "u1", OrgRole::Manager));

        assert!(matches!(
            OrgRoleEdge::parse("o1:u1"),
            Err(ProviderError::InvalidImportId { .. })
        ));
        assert!(SpaceRoleEdge::parse("s1:u1:billing_manager").is_err());
    }

    #[test]
    fn test_role_spelling_is_canonical() {
        let config = canonical_role::<SpaceRole>(attrs(json!({"role": "developers"})), |r| r.as_str()).unwrap();
        assert_eq!(config["role"], json!("developer"));
        assert!(canonical_role::<OrgRole>(attrs(json!({"role": "owner"})), |r| r.as_str()).is_err());
    }
}
