//! `cloudfoundry_space`

use super::{found, recorded_guid, recorded_guids, set_delta};
use crate::diff::ChangeSet;
use crate::error::Result;
use crate::mapper::{to_body, to_state};
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use cfstack_api::DeleteOptions;
use cfstack_api::resources::{OrgRole, SpaceRole};
use serde_json::{Value, json};
use tracing::{debug, info};

const ROLES: [(&str, SpaceRole); 3] = [
    ("managers", SpaceRole::Manager),
    ("developers", SpaceRole::Developer),
    ("auditors", SpaceRole::Auditor),
];

/// Security group sets: attribute name and whether it applies to staging
const GROUPS: [(&str, bool); 2] = [("asgs", false), ("staging_asgs", true)];

pub struct Space {
    schema: Schema,
}

impl Space {
    pub fn new() -> Self {
        let mut attributes = vec![
            Attribute::string("name").required(),
            Attribute::string("org")
                .required()
                .force_new()
                .field("organization_guid")
                .relation(RelationKind::Org),
            Attribute::string("quota")
                .optional_computed()
                .field("space_quota_definition_guid")
                .relation_in(RelationKind::SpaceQuota, "org"),
            Attribute::bool("allow_ssh").default(json!(true)),
            Attribute::string("isolation_segment")
                .unmapped()
                .relation(RelationKind::IsolationSegment),
            Attribute::bool("delete_recursive").local().default(json!(false)),
        ];
        for (name, _) in GROUPS {
            attributes.push(
                Attribute::set(name)
                    .unmapped()
                    .optional_computed()
                    .relation(RelationKind::SecurityGroup),
            );
        }
        for (name, _) in ROLES {
            attributes.push(
                Attribute::set(name)
                    .unmapped()
                    .optional_computed()
                    .relation(RelationKind::User),
            );
        }
        Self {
            schema: Schema::new("cloudfoundry_space", attributes),
        }
    }

    /// Bring security groups and roles to `config`. With `changes`, only
    /// changed sets are touched and the current platform view is diffed.
    async fn sync_edges(
        &self,
        ctx: &OpContext,
        space: &str,
        config: &Attrs,
        changes: Option<&ChangeSet>,
    ) -> Result<()> {
        let wanted = |name: &str| {
            config.get(name).is_some_and(|v| !v.is_null()) && changes.is_none_or(|c| c.has(name))
        };

        let groups = ctx.client().security_groups();
        for (name, staging) in GROUPS {
            if !wanted(name) {
                continue;
            }
            let current = match changes {
                Some(_) => found(ctx.client().spaces().security_groups(space, staging).await)?
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            let (add, remove) = set_delta(&current, &config.strings(name));
            for group in add {
                groups.bind_space(&group, space, staging).await?;
            }
            for group in remove {
                groups.unbind_space(&group, space, staging).await?;
            }
        }

        let spaces = ctx.client().spaces();
        let org = config.str_attr("org").unwrap_or_default();
        for (name, role) in ROLES {
            if !wanted(name) {
                continue;
            }
            let current = match changes {
                Some(_) => found(spaces.role_members(space, role).await)?.unwrap_or_default(),
                None => Vec::new(),
            };
            let (add, remove) = set_delta(&current, &config.strings(name));
            for user in add {
                // Space roles need org membership first.
                ctx.client()
                    .organizations()
                    .associate_role(org, OrgRole::User, &user)
                    .await?;
                spaces.associate_role(space, role, &user).await?;
            }
            for user in remove {
                spaces.remove_role(space, role, &user).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Resource for Space {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let body = to_body(&self.schema, config, None);
        let space = ctx
            .client()
            .spaces()
            .create(Value::Object(body))
            .await?
            .metadata
            .guid;
        if let Some(segment) = config.str_attr("isolation_segment") {
            ctx.client()
                .spaces()
                .set_isolation_segment(&space, Some(segment))
                .await?;
        }
        self.sync_edges(ctx, &space, config, None).await?;
        Ok(space)
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let spaces = ctx.client().spaces();
        let Some(entity) = found(spaces.get(id).await)? else {
            return Ok(None);
        };
        let mut state = to_state(&self.schema, &entity.entity, prior);

        if ctx.client().isolation_segments().require_supported().is_ok() {
            let segment = found(spaces.isolation_segment(id).await)?.flatten();
            state.insert("isolation_segment".into(), json!(segment));
        }
        for (name, staging) in GROUPS {
            let groups = found(spaces.security_groups(id, staging).await)?.unwrap_or_default();
            state.insert(name.into(), json!(groups));
        }
        for (name, role) in ROLES {
            let members = found(spaces.role_members(id, role).await)?.unwrap_or_default();
            state.insert(name.into(), json!(members));
        }
        Ok(Some(state))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Attrs,
        config: &Attrs,
        changes: &ChangeSet,
    ) -> Result<()> {
        let body = to_body(&self.schema, config, Some(&changes.changed));
        if !body.is_empty() {
            ctx.client().spaces().update(id, Value::Object(body)).await?;
        }
        if changes.has("isolation_segment") {
            ctx.client()
                .spaces()
                .set_isolation_segment(id, config.str_attr("isolation_segment"))
                .await?;
        }
        self.sync_edges(ctx, id, config, Some(changes)).await
    }

    async fn delete(&self, ctx: &OpContext, id: &str, state: &Attrs) -> Result<()> {
        let spaces = ctx.client().spaces();
        for (name, role) in ROLES {
            for user in recorded_guids(ctx, state, name, RelationKind::User, None).await? {
                debug!(space = id, %role, user = %user, "removing role");
                spaces.remove_role(id, role, &user).await?;
            }
        }
        let groups = ctx.client().security_groups();
        for (name, staging) in GROUPS {
            for group in recorded_guids(ctx, state, name, RelationKind::SecurityGroup, None).await? {
                groups.unbind_space(&group, id, staging).await?;
            }
        }
        if recorded_guid(ctx, state, "isolation_segment", RelationKind::IsolationSegment)
            .await?
            .is_some()
        {
            spaces.set_isolation_segment(id, None).await?;
        }

        let recursive = state.bool_attr("delete_recursive").unwrap_or(false);
        spaces
            .delete(id, DeleteOptions::background().recursive(recursive))
            .await?;
        info!(space = id, recursive, "space deleted");
        Ok(())
    }
}
