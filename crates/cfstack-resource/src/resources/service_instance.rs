//! `cloudfoundry_service_instance` and `cloudfoundry_service_key`

use super::found;
use crate::diff::ChangeSet;
use crate::error::{ProviderError, Result};
use crate::mapper::{to_body, to_state};
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use cfstack_api::DeleteOptions;
use serde_json::{Map, Value, json};
use tracing::info;

/// Managed instance; provisioning, updates and deletes wait for the
/// broker's last operation.
pub struct ServiceInstance {
    schema: Schema,
}

impl ServiceInstance {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_service_instance",
                vec![
                    Attribute::string("name").required(),
                    Attribute::string("space")
                        .required()
                        .force_new()
                        .field("space_guid")
                        .relation(RelationKind::Space),
                    Attribute::string("service_plan")
                        .required()
                        .field("service_plan_guid")
                        .relation(RelationKind::ServicePlan),
                    Attribute::string("json_params").local(),
                    Attribute::set("tags"),
                    Attribute::bool("recursive_delete").local().default(json!(false)),
                    Attribute::string("dashboard_url").computed(),
                ],
            ),
        }
    }
}

/// `json_params` parsed into the request's `parameters`.
fn with_parameters(mut body: Map<String, Value>, config: &Attrs) -> Result<Map<String, Value>> {
    if let Some(raw) = config.str_attr("json_params") {
        let params: Value = serde_json::from_str(raw)
            .map_err(|e| ProviderError::invalid_config(format!("json_params: {}", e)))?;
        body.insert("parameters".into(), params);
    }
    Ok(body)
}

#[async_trait]
impl Resource for ServiceInstance {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let body = with_parameters(to_body(&self.schema, config, None), config)?;
        let created = ctx
            .client()
            .service_instances()
            .create_and_wait(Value::Object(body), ctx.config().job_poll_timeout)
            .await?;
        Ok(created.metadata.guid)
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let Some(entity) = found(ctx.client().service_instances().get(id).await)? else {
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
        let mut body = to_body(&self.schema, config, Some(&changes.changed));
        if changes.has("json_params") {
            body = with_parameters(body, config)?;
        }
        if body.is_empty() {
            return Ok(());
        }
        ctx.client()
            .service_instances()
            .update_and_wait(id, Value::Object(body), ctx.config().job_poll_timeout)
            .await?;
        info!(service_instance = id, "service instance updated");
        Ok(())
    }

    /// A purge also removes the instance's bindings and keys.
    async fn delete(&self, ctx: &OpContext, id: &str, state: &Attrs) -> Result<()> {
        let purge = ctx.config().purge_when_deleted;
        let options = DeleteOptions::default()
            .recursive(purge || state.bool_attr("recursive_delete").unwrap_or(false))
            .purge(purge);
        ctx.client()
            .service_instances()
            .delete_and_wait(id, options, ctx.config().job_poll_timeout)
            .await?;
        info!(service_instance = id, "service instance deleted");
        Ok(())
    }
}

/// Credentials issued for one instance; never updated in place.
pub struct ServiceKey {
    schema: Schema,
}

impl ServiceKey {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_service_key",
                vec![
                    Attribute::string("name").required().force_new(),
                    Attribute::string("service_instance")
                        .required()
                        .force_new()
                        .field("service_instance_guid")
                        .relation(RelationKind::ServiceInstance),
                    Attribute::map("params").force_new().local(),
                    Attribute::map("credentials").computed().sensitive(),
                ],
            ),
        }
    }
}

#[async_trait]
impl Resource for ServiceKey {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let mut body = to_body(&self.schema, config, None);
        if let Some(params) = config.get("params").filter(|p| p.is_object()) {
            body.insert("parameters".into(), params.clone());
        }
        let created = ctx
            .client()
            .service_keys()
            .create(Value::Object(body))
            .await?;
        Ok(created.metadata.guid)
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let Some(entity) = found(ctx.client().service_keys().get(id).await)? else {
            return Ok(None);
        };
        Ok(Some(to_state(&self.schema, &entity.entity, prior)))
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
        ctx.client()
            .service_keys()
            .delete(id, DeleteOptions::default())
            .await?;
        Ok(())
    }
}
