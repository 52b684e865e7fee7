//! `cloudfoundry_service_broker`

use super::found;
use crate::diff::ChangeSet;
use crate::error::Result;
use crate::mapper::{to_body, to_state};
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use cfstack_api::{DeleteOptions, warnings};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::info;

pub struct ServiceBroker {
    schema: Schema,
}

impl ServiceBroker {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_service_broker",
                vec![
                    Attribute::string("name").required(),
                    Attribute::string("url").required().field("broker_url"),
                    Attribute::string("username")
                        .required()
                        .field("auth_username"),
                    Attribute::string("password").required().sensitive().local(),
                    Attribute::string("space")
                        .force_new()
                        .field("space_guid")
                        .relation(RelationKind::Space),
                    Attribute::bool("fail_when_catalog_not_accessible")
                        .local()
                        .default(json!(true)),
                    Attribute::map("service_plans").computed().unmapped(),
                ],
            ),
        }
    }

    /// `service/plan` → plan guid. An unreachable catalog fails the
    /// operation unless the configuration tolerates it.
    async fn catalog(&self, ctx: &OpContext, broker: &str, config: &Attrs) -> Result<BTreeMap<String, String>> {
        match ctx.client().service_brokers().catalog(broker).await {
            Ok(catalog) => Ok(catalog),
            Err(e) => {
                let must_fail = config
                    .bool_attr("fail_when_catalog_not_accessible")
                    .unwrap_or(true)
                    && !ctx.config().force_broker_not_fail_when_catalog_not_accessible;
                if must_fail {
                    return Err(e.into());
                }
                warnings::push(format!("catalog of service broker {} is not accessible: {}", broker, e));
                Ok(BTreeMap::new())
            }
        }
    }
}

fn with_password(mut body: Map<String, Value>, config: &Attrs) -> Map<String, Value> {
    if let Some(password) = config.str_attr("password") {
        body.insert("auth_password".into(), json!(password));
    }
    body
}

#[async_trait]
impl Resource for ServiceBroker {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let body = with_password(to_body(&self.schema, config, None), config);
        let broker = ctx
            .client()
            .service_brokers()
            .create(Value::Object(body))
            .await?
            .metadata
            .guid;
        let catalog = self.catalog(ctx, &broker, config).await?;
        info!(broker = %broker, plans = catalog.len(), "service broker registered");
        Ok(broker)
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let Some(entity) = found(ctx.client().service_brokers().get(id).await)? else {
            return Ok(None);
        };
        let mut state = to_state(&self.schema, &entity.entity, prior);
        let catalog = self.catalog(ctx, id, prior).await?;
        state.insert("service_plans".into(), json!(catalog));
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
        let mut body = to_body(&self.schema, config, Some(&changes.changed));
        // The broker re-authenticates on every update.
        body = with_password(body, config);
        ctx.client()
            .service_brokers()
            .update(id, Value::Object(body))
            .await?;
        self.catalog(ctx, id, config).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Attrs) -> Result<()> {
        let brokers = ctx.client().service_brokers();
        if ctx.config().purge_when_deleted {
            brokers.purge_and_delete(id).await?;
        } else {
            brokers.delete(id, DeleteOptions::default()).await?;
        }
        Ok(())
    }
}
