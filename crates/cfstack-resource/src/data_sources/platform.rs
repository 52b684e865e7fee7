//! Platform info, recent app logs and parsed manifests

use crate::error::Result;
use crate::resource::{DataSource, OpContext};
use crate::resources::manifest_source;
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use cfstack_api::resources::{info, logs};
use cfstack_config::AppLogsMax;
use serde_json::{Value, json};
use tracing::debug;

pub struct Info {
    schema: Schema,
}

impl Info {
    pub fn new() -> Self {
        let attributes = [
            "api_url",
            "api_version",
            "auth_endpoint",
            "token_endpoint",
            "logging_endpoint",
            "routing_endpoint",
            "name",
            "description",
        ]
        .into_iter()
        .map(|name| Attribute::string(name).computed().unmapped())
        .collect();
        Self {
            schema: Schema::new("cloudfoundry_info", attributes),
        }
    }
}

#[async_trait]
impl DataSource for Info {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, ctx: &OpContext, _config: &Attrs) -> Result<(String, Attrs)> {
        let platform = info::get(ctx.client()).await?;
        let api_url = ctx.config().api_url.clone();
        let mut attrs = Attrs::new();
        attrs.insert("api_url".into(), json!(api_url));
        attrs.insert("api_version".into(), json!(platform.api_version));
        attrs.insert("auth_endpoint".into(), json!(platform.authorization_endpoint));
        attrs.insert("token_endpoint".into(), json!(platform.token_endpoint));
        attrs.insert("logging_endpoint".into(), json!(platform.doppler_logging_endpoint));
        attrs.insert("routing_endpoint".into(), json!(platform.routing_endpoint));
        attrs.insert("name".into(), json!(platform.name));
        attrs.insert("description".into(), json!(platform.description));
        Ok(("info".into(), attrs))
    }
}

/// Recent log lines of one app, oldest first
pub struct AppLogs {
    schema: Schema,
}

impl AppLogs {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_app_logs",
                vec![
                    Attribute::string("app")
                        .required()
                        .unmapped()
                        .relation(RelationKind::App),
                    Attribute::string("space")
                        .unmapped()
                        .relation(RelationKind::Space),
                    Attribute::int("max").unmapped(),
                    Attribute::list("lines").computed().unmapped(),
                ],
            ),
        }
    }
}

#[async_trait]
impl DataSource for AppLogs {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, ctx: &OpContext, config: &Attrs) -> Result<(String, Attrs)> {
        let app = config.str_attr("app").unwrap_or_default();
        let space = match config.str_attr("space") {
            Some(space) => Some(
                ctx.resolver
                    .resolve("space", RelationKind::Space, space, None)
                    .await?,
            ),
            None => None,
        };
        let app = ctx
            .resolver
            .resolve("app", RelationKind::App, app, space.as_deref())
            .await?;

        let limit = config
            .int_attr("max")
            .map(AppLogsMax::from_i64)
            .unwrap_or(ctx.config().app_logs_max);
        let lines: Vec<String> = logs::recent(ctx.client(), &app, limit)
            .await?
            .iter()
            .map(ToString::to_string)
            .collect();
        debug!(app = %app, count = lines.len(), "read recent logs");

        let mut attrs = Attrs::new();
        attrs.insert("lines".into(), json!(lines));
        Ok((app, attrs))
    }
}

/// Applications of a manifest after variable interpolation
pub struct ManifestDoc {
    schema: Schema,
}

impl ManifestDoc {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_manifest",
                vec![
                    Attribute::string("path").required().unmapped(),
                    Attribute::list("vars_files").unmapped(),
                    Attribute::map("vars").unmapped(),
                    Attribute::block("applications").computed().unmapped(),
                ],
            ),
        }
    }
}

#[async_trait]
impl DataSource for ManifestDoc {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, _ctx: &OpContext, config: &Attrs) -> Result<(String, Attrs)> {
        let path = config.str_attr("path").unwrap_or_default();
        let manifest = manifest_source(path, config).load()?;
        let applications = serde_json::to_value(&manifest)?
            .get("applications")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let mut attrs = Attrs::new();
        attrs.insert("applications".into(), applications);
        Ok((path.to_string(), attrs))
    }
}
