//! `cloudfoundry_domain`
//!
//! Shared when no org is given, private to `org` otherwise. Domains are
//! immutable: every attribute forces replacement.

use super::found;
use crate::diff::ChangeSet;
use crate::error::Result;
use crate::mapper::{to_body, to_state};
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use cfstack_api::DeleteOptions;
use cfstack_api::resources::domains::DomainScope;
use serde_json::{Value, json};

pub struct Domain {
    schema: Schema,
}

impl Domain {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_domain",
                vec![
                    Attribute::string("name").required().force_new(),
                    Attribute::string("org")
                        .force_new()
                        .field("owning_organization_guid")
                        .relation(RelationKind::Org),
                    Attribute::string("router_group")
                        .force_new()
                        .field("router_group_guid"),
                    Attribute::bool("internal").force_new().optional_computed(),
                    Attribute::bool("shared").computed().unmapped(),
                ],
            ),
        }
    }
}

#[async_trait]
impl Resource for Domain {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let scope = if config.str_attr("org").is_some() {
            DomainScope::Private
        } else {
            DomainScope::Shared
        };
        let body = to_body(&self.schema, config, None);
        let domains = ctx.client().domains();
        let created = domains.collection(scope).create(Value::Object(body)).await?;
        Ok(created.metadata.guid)
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let Some((scope, entity)) = found(ctx.client().domains().get(id).await)? else {
            return Ok(None);
        };
        let mut state = to_state(&self.schema, &entity.entity, prior);
        state.insert("shared".into(), json!(scope == DomainScope::Shared));
        Ok(Some(state))
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
        let domains = ctx.client().domains();
        let Some((scope, _)) = found(domains.get(id).await)? else {
            return Ok(());
        };
        domains
            .collection(scope)
            .delete(id, DeleteOptions::background())
            .await?;
        Ok(())
    }
}
