//! `cloudfoundry_org`

use super::{found, recorded_guids, set_delta};
use crate::diff::ChangeSet;
use crate::error::Result;
use crate::mapper::{to_body, to_state};
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use cfstack_api::DeleteOptions;
use cfstack_api::resources::OrgRole;
use serde_json::{Value, json};
use tracing::{debug, info};

/// Role sets managed on the org, with their attribute names
const ROLES: [(&str, OrgRole); 3] = [
    ("managers", OrgRole::Manager),
    ("billing_managers", OrgRole::BillingManager),
    ("auditors", OrgRole::Auditor),
];

pub struct Org {
    schema: Schema,
}

impl Org {
    pub fn new() -> Self {
        let mut attributes = vec![
            Attribute::string("name").required(),
            Attribute::string("quota")
                .optional_computed()
                .field("quota_definition_guid")
                .relation(RelationKind::OrgQuota),
            Attribute::string("default_isolation_segment")
                .unmapped()
                .relation(RelationKind::IsolationSegment),
            Attribute::bool("delete_recursive").local().default(json!(false)),
        ];
        for (name, _) in ROLES {
            attributes.push(
                Attribute::set(name)
                    .unmapped()
                    .optional_computed()
                    .relation(RelationKind::User),
            );
        }
        Self {
            schema: Schema::new("cloudfoundry_org", attributes),
        }
    }

    async fn sync_roles(&self, ctx: &OpContext, org: &str, config: &Attrs, only: Option<&ChangeSet>) -> Result<()> {
        let orgs = ctx.client().organizations();
        for (name, role) in ROLES {
            if config.get(name).is_none_or(Value::is_null) || only.is_some_and(|c| !c.has(name)) {
                continue;
            }
            let current = match only {
                Some(_) => found(orgs.role_members(org, role).await)?.unwrap_or_default(),
                None => Vec::new(),
            };
            let (add, remove) = set_delta(&current, &config.strings(name));
            for user in add {
                orgs.associate_role(org, role, &user).await?;
            }
            for user in remove {
                orgs.remove_role(org, role, &user).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Resource for Org {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let mut body = to_body(&self.schema, config, None);
        if !body.contains_key("quota_definition_guid")
            && let Some(quota) = &ctx.session.default_quota_guid
        {
            body.insert("quota_definition_guid".into(), json!(quota));
        }
        let org = ctx
            .client()
            .organizations()
            .create(Value::Object(body))
            .await?
            .metadata
            .guid;

        if let Some(segment) = config.str_attr("default_isolation_segment") {
            ctx.client()
                .organizations()
                .set_default_isolation_segment(&org, Some(segment))
                .await?;
        }
        self.sync_roles(ctx, &org, config, None).await?;
        Ok(org)
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let orgs = ctx.client().organizations();
        let Some(entity) = found(orgs.get(id).await)? else {
            return Ok(None);
        };
        let mut state = to_state(&self.schema, &entity.entity, prior);

        if ctx.client().isolation_segments().require_supported().is_ok() {
            let segment = found(orgs.default_isolation_segment(id).await)?.flatten();
            state.insert("default_isolation_segment".into(), json!(segment));
        }
        for (name, role) in ROLES {
            let members = found(orgs.role_members(id, role).await)?.unwrap_or_default();
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
            ctx.client()
                .organizations()
                .update(id, Value::Object(body))
                .await?;
        }
        if changes.has("default_isolation_segment") {
            ctx.client()
                .organizations()
                .set_default_isolation_segment(id, config.str_attr("default_isolation_segment"))
                .await?;
        }
        self.sync_roles(ctx, id, config, Some(changes)).await
    }

    async fn delete(&self, ctx: &OpContext, id: &str, state: &Attrs) -> Result<()> {
        let orgs = ctx.client().organizations();
        for (name, role) in ROLES {
            for user in recorded_guids(ctx, state, name, RelationKind::User, None).await? {
                debug!(org = id, %role, user = %user, "removing role");
                orgs.remove_role(id, role, &user).await?;
            }
        }
        let recursive = state.bool_attr("delete_recursive").unwrap_or(false);
        orgs.delete(id, DeleteOptions::background().recursive(recursive))
            .await?;
        info!(org = id, recursive, "org deleted");
        Ok(())
    }
}
