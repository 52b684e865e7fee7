//! `cloudfoundry_route` and `cloudfoundry_route_service_binding`

use super::found;
use crate::diff::ChangeSet;
use crate::error::{ProviderError, Result};
use crate::mapper::{to_body, to_state};
use crate::resource::{OpContext, Resource, split_key};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use cfstack_api::DeleteOptions;
use serde_json::{Value, json};
use tracing::info;

/// Every attribute identifies the route, so nothing updates in place.
pub struct Route {
    schema: Schema,
}

impl Route {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_route",
                vec![
                    Attribute::string("domain")
                        .required()
                        .force_new()
                        .field("domain_guid")
                        .relation(RelationKind::Domain),
                    Attribute::string("space")
                        .required()
                        .force_new()
                        .field("space_guid")
                        .relation(RelationKind::Space),
                    Attribute::string("hostname").force_new().field("host"),
                    Attribute::int("port").force_new().optional_computed(),
                    Attribute::string("path").force_new(),
                    Attribute::string("endpoint").computed().unmapped(),
                ],
            ),
        }
    }
}

/// `host.domain:port/path` as clients reach it
fn endpoint(state: &Attrs, domain: &str) -> String {
    let mut endpoint = match state.str_attr("hostname") {
        Some(host) => format!("{}.{}", host, domain),
        None => domain.to_string(),
    };
    if let Some(port) = state.int_attr("port").filter(|p| *p > 0) {
        endpoint.push_str(&format!(":{}", port));
    }
    if let Some(path) = state.str_attr("path") {
        endpoint.push_str(path);
    }
    endpoint
}

#[async_trait]
impl Resource for Route {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let body = to_body(&self.schema, config, None);
        let route = ctx
            .client()
            .routes()
            .create(Value::Object(body))
            .await?
            .metadata
            .guid;
        info!(route = %route, "route reserved");
        Ok(route)
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let Some(entity) = found(ctx.client().routes().get(id).await)? else {
            return Ok(None);
        };
        let mut state = to_state(&self.schema, &entity.entity, prior);
        if let Some(domain) = entity.str_field("domain_guid")
            && let Some((_, domain)) = found(ctx.client().domains().get(domain).await)?
        {
            let name = domain.str_field("name").unwrap_or_default().to_string();
            state.insert("endpoint".into(), json!(endpoint(&state, &name)));
        }
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

    /// Unmap apps and any route service before deleting the route.
    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Attrs) -> Result<()> {
        let routes = ctx.client().routes();
        for app in found(routes.app_guids(id).await)?.unwrap_or_default() {
            ctx.client().apps().unbind_route(&app, id).await?;
        }
        if found(routes.route_service(id).await)?.flatten().is_some() {
            routes.unbind_route_service(id).await?;
        }
        routes.delete(id, DeleteOptions::background()).await?;
        Ok(())
    }
}

/// Route service bound to a route; id is `route_guid:service_instance_guid`
pub struct RouteServiceBinding {
    schema: Schema,
}

impl RouteServiceBinding {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_route_service_binding",
                vec![
                    Attribute::string("route").required().force_new().unmapped(),
                    Attribute::string("service_instance")
                        .required()
                        .force_new()
                        .unmapped()
                        .relation(RelationKind::ServiceInstance),
                    Attribute::string("json_params").force_new().local(),
                ],
            ),
        }
    }
}

const BINDING_KEY: &str = "route_guid:service_instance_guid";

fn json_params(config: &Attrs) -> Result<Option<Value>> {
    match config.str_attr("json_params") {
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| ProviderError::invalid_config(format!("json_params: {}", e))),
        None => Ok(None),
    }
}

#[async_trait]
impl Resource for RouteServiceBinding {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let route = config.str_attr("route").unwrap_or_default();
        let instance = config.str_attr("service_instance").unwrap_or_default();
        ctx.client()
            .routes()
            .bind_route_service(route, instance, json_params(config)?)
            .await?;
        Ok(format!("{}:{}", route, instance))
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let key = split_key(id, 2, BINDING_KEY)?;
        let (route, instance) = (key[0], key[1]);
        let bound = found(ctx.client().routes().route_service(route).await)?.flatten();
        if bound.as_deref() != Some(instance) {
            return Ok(None);
        }
        let mut state = Attrs::new();
        state.insert("route".into(), json!(route));
        state.insert("service_instance".into(), json!(instance));
        if let Some(params) = prior.get("json_params") {
            state.insert("json_params".into(), params.clone());
        }
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
        let key = split_key(id, 2, BINDING_KEY)?;
        ctx.client().routes().unbind_route_service(key[0]).await?;
        Ok(())
    }

    async fn import_id(&self, _ctx: &OpContext, import_id: &str) -> Result<String> {
        split_key(import_id, 2, BINDING_KEY)?;
        Ok(import_id.to_string())
    }
}
