//! Kinds whose every attribute maps straight onto one v2 entity

use super::found;
use crate::diff::ChangeSet;
use crate::error::Result;
use crate::mapper::{to_body, to_state};
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::Attrs;
use async_trait::async_trait;
use cfstack_api::DeleteOptions;
use cfstack_api::resources::V2Collection;
use serde_json::{Value, json};
use tracing::debug;

/// Plain CRUD over one v2 collection
pub struct GenericV2 {
    schema: Schema,
    path: &'static str,
}

impl GenericV2 {
    pub fn new(schema: Schema, path: &'static str) -> Self {
        Self { schema, path }
    }

    fn collection(&self, ctx: &OpContext) -> V2Collection {
        V2Collection::new(ctx.client(), self.path)
    }
}

#[async_trait]
impl Resource for GenericV2 {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let body = to_body(&self.schema, config, None);
        let created = self.collection(ctx).create(Value::Object(body)).await?;
        Ok(created.metadata.guid)
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let Some(entity) = found(self.collection(ctx).get(id).await)? else {
            return Ok(None);
        };
        Ok(Some(to_state(&self.schema, &entity.entity, prior)))
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
        if body.is_empty() {
            debug!(kind = self.schema.type_name, id, "nothing to send");
            return Ok(());
        }
        self.collection(ctx).update(id, Value::Object(body)).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Attrs) -> Result<()> {
        self.collection(ctx)
            .delete(id, DeleteOptions::background())
            .await?;
        Ok(())
    }
}

fn quota_limits() -> Vec<Attribute> {
    vec![
        Attribute::bool("allow_paid_service_plans")
            .field("non_basic_services_allowed")
            .default(json!(false)),
        Attribute::int("instance_memory")
            .field("instance_memory_limit")
            .normalize(crate::normalize::Normalize::MemoryMb)
            .default(json!(-1)),
        Attribute::int("total_memory")
            .field("memory_limit")
            .normalize(crate::normalize::Normalize::MemoryMb)
            .required(),
        Attribute::int("total_app_instances")
            .field("app_instance_limit")
            .default(json!(-1)),
        Attribute::int("total_routes").required(),
        Attribute::int("total_services").required(),
        Attribute::int("total_route_ports")
            .field("total_reserved_route_ports")
            .default(json!(0)),
        Attribute::int("total_service_keys").default(json!(-1)),
    ]
}

pub fn org_quota() -> GenericV2 {
    let mut attributes = vec![Attribute::string("name").required()];
    attributes.extend(quota_limits());
    attributes.push(Attribute::int("total_private_domains").default(json!(-1)));
    GenericV2::new(
        Schema::new("cloudfoundry_org_quota", attributes),
        "/v2/quota_definitions",
    )
}

pub fn space_quota() -> GenericV2 {
    let mut attributes = vec![
        Attribute::string("name").required(),
        Attribute::string("org")
            .required()
            .force_new()
            .field("organization_guid")
            .relation(RelationKind::Org),
    ];
    attributes.extend(quota_limits());
    GenericV2::new(
        Schema::new("cloudfoundry_space_quota", attributes),
        "/v2/space_quota_definitions",
    )
}

/// Application security group; space bindings live on the space.
pub fn asg() -> GenericV2 {
    GenericV2::new(
        Schema::new(
            "cloudfoundry_asg",
            vec![
                Attribute::string("name").required(),
                Attribute::block("rules").required(),
            ],
        ),
        "/v2/security_groups",
    )
}

pub fn user_provided_service() -> GenericV2 {
    GenericV2::new(
        Schema::new(
            "cloudfoundry_user_provided_service",
            vec![
                Attribute::string("name").required(),
                Attribute::string("space")
                    .required()
                    .force_new()
                    .field("space_guid")
                    .relation(RelationKind::Space),
                Attribute::map("credentials").sensitive(),
                Attribute::string("syslog_drain_url"),
                Attribute::string("route_service_url"),
                Attribute::set("tags"),
            ],
        ),
        "/v2/user_provided_service_instances",
    )
}
