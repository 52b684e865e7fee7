//! `cloudfoundry_service_plan_access` and `cloudfoundry_service_instance_sharing`
//!
//! Plan access is either an org visibility (id is the visibility guid) or
//! the plan's public flag (id is the plan guid). Sharing ids are
//! `service_instance_guid:space_guid`.

use super::found;
use crate::diff::ChangeSet;
use crate::error::{ProviderError, Result};
use crate::resource::{OpContext, Resource, split_key};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

pub struct ServicePlanAccess {
    schema: Schema,
}

impl ServicePlanAccess {
    pub fn new() -> Self {
        Self::named("cloudfoundry_service_plan_access")
    }

    /// Older name of the same kind.
    pub fn legacy() -> Self {
        Self::named("cloudfoundry_service_access")
    }

    fn named(type_name: &'static str) -> Self {
        Self {
            schema: Schema::new(
                type_name,
                vec![
                    Attribute::string("plan")
                        .required()
                        .force_new()
                        .unmapped()
                        .relation(RelationKind::ServicePlan),
                    Attribute::string("org")
                        .force_new()
                        .unmapped()
                        .relation(RelationKind::Org),
                    Attribute::bool("public")
                        .optional_computed()
                        .force_new()
                        .unmapped(),
                ],
            ),
        }
    }

    async fn read_visibility(&self, ctx: &OpContext, id: &str) -> Result<Option<Attrs>> {
        let Some(visibility) = found(ctx.client().service_plan_visibilities().get(id).await)? else {
            return Ok(None);
        };
        let mut state = Attrs::new();
        for (attr, field) in [("plan", "service_plan_guid"), ("org", "organization_guid")] {
            let value = visibility.str_field(field).unwrap_or_default();
            state.insert(attr.into(), json!(value));
        }
        Ok(Some(state))
    }

    async fn read_public(&self, ctx: &OpContext, id: &str) -> Result<Option<Attrs>> {
        let Some(plan) = found(ctx.client().service_plans().get(id).await)? else {
            return Ok(None);
        };
        let public = plan.entity.get("public").and_then(Value::as_bool).unwrap_or(false);
        let mut state = Attrs::new();
        state.insert("plan".into(), json!(id));
        state.insert("public".into(), json!(public));
        Ok(Some(state))
    }
}

#[async_trait]
impl Resource for ServicePlanAccess {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn prepare(&self, _ctx: &OpContext, config: Attrs) -> Result<Attrs> {
        if config.str_attr("org").is_some() && config.get("public").is_some_and(|v| !v.is_null()) {
            return Err(ProviderError::invalid_config(
                "org and public cannot both be set on a plan access",
            ));
        }
        Ok(config)
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let plan = config.str_attr("plan").unwrap_or_default();
        let client = ctx.client();
        match config.str_attr("org") {
            Some(org) => {
                let visibility = client.service_plan_visibilities().grant(plan, org).await?;
                Ok(visibility.metadata.guid)
            }
            None => {
                let public = config.bool_attr("public").unwrap_or(false);
                client.service_plans().set_public(plan, public).await?;
                info!(plan, public, "plan visibility set");
                Ok(plan.to_string())
            }
        }
    }

    /// A recorded org means an org visibility, a recorded `public` means the
    /// plan flag; imports try the visibility first.
    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        if prior.str_attr("org").is_some() {
            return self.read_visibility(ctx, id).await;
        }
        if prior.contains_key("public") {
            return self.read_public(ctx, id).await;
        }
        match self.read_visibility(ctx, id).await? {
            Some(state) => Ok(Some(state)),
            None => self.read_public(ctx, id).await,
        }
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

    /// Only org visibilities are removed; the public flag stays as it is.
    async fn delete(&self, ctx: &OpContext, id: &str, state: &Attrs) -> Result<()> {
        if state.str_attr("org").is_none() {
            return Ok(());
        }
        ctx.client()
            .service_plan_visibilities()
            .delete(id, Default::default())
            .await?;
        Ok(())
    }
}

pub struct ServiceInstanceSharing {
    schema: Schema,
}

const SHARING_KEY: &str = "service_instance_guid:space_guid";

impl ServiceInstanceSharing {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_service_instance_sharing",
                vec![
                    Attribute::string("service_instance")
                        .required()
                        .force_new()
                        .unmapped()
                        .relation(RelationKind::ServiceInstance),
                    Attribute::string("space")
                        .required()
                        .force_new()
                        .unmapped()
                        .relation(RelationKind::Space),
                ],
            ),
        }
    }

    fn parse(id: &str) -> Result<(String, String)> {
        let key = split_key(id, 2, SHARING_KEY)?;
        Ok((key[0].to_string(), key[1].to_string()))
    }
}

#[async_trait]
impl Resource for ServiceInstanceSharing {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let instance = config.str_attr("service_instance").unwrap_or_default();
        let space = config.str_attr("space").unwrap_or_default();
        ctx.client().service_instances().share(instance, space).await?;
        Ok(format!("{}:{}", instance, space))
    }

    async fn read(&self, ctx: &OpContext, id: &str, _prior: &Attrs) -> Result<Option<Attrs>> {
        let (instance, space) = Self::parse(id)?;
        let shared = found(ctx.client().service_instances().shared_spaces(&instance).await)?;
        if !shared.is_some_and(|spaces| spaces.contains(&space)) {
            return Ok(None);
        }
        let mut state = Attrs::new();
        state.insert("service_instance".into(), json!(instance));
        state.insert("space".into(), json!(space));
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
        let (instance, space) = Self::parse(id)?;
        ctx.client().service_instances().unshare(&instance, &space).await?;
        Ok(())
    }

    async fn import_id(&self, _ctx: &OpContext, import_id: &str) -> Result<String> {
        let (instance, space) = Self::parse(import_id)?;
        Ok(format!("{}:{}", instance, space))
    }
}
