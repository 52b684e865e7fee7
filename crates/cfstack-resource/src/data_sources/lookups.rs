//! Lookups that need more than one name filter

use crate::error::{ProviderError, Result};
use crate::mapper::to_state;
use crate::resource::{DataSource, OpContext};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use cfstack_api::{V2Query, pagination};
use cfstack_api::resources::domains::DomainScope;
use serde_json::{Value, json};

fn not_found(type_name: &str, what: impl std::fmt::Display) -> ProviderError {
    ProviderError::NotFound(format!("{} {}", type_name, what))
}

pub struct DomainLookup {
    schema: Schema,
}

impl DomainLookup {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_domain",
                vec![
                    Attribute::string("name").required(),
                    Attribute::string("org")
                        .computed()
                        .field("owning_organization_guid"),
                    Attribute::bool("internal").computed(),
                    Attribute::bool("shared").computed().unmapped(),
                ],
            ),
        }
    }
}

#[async_trait]
impl DataSource for DomainLookup {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, ctx: &OpContext, config: &Attrs) -> Result<(String, Attrs)> {
        let name = config.str_attr("name").unwrap_or_default();
        let (scope, domain) = ctx
            .client()
            .domains()
            .find_by_name(name)
            .await?
            .ok_or_else(|| not_found(self.schema.type_name, format!("{:?}", name)))?;
        let mut attrs = to_state(&self.schema, &domain.entity, &Attrs::new());
        attrs.insert("shared".into(), json!(scope == DomainScope::Shared));
        Ok((domain.metadata.guid, attrs))
    }
}

pub struct IsolationSegmentLookup {
    schema: Schema,
}

impl IsolationSegmentLookup {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_isolation_segment",
                vec![
                    Attribute::string("name").required(),
                    Attribute::string("created_at").computed(),
                ],
            ),
        }
    }
}

#[async_trait]
impl DataSource for IsolationSegmentLookup {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, ctx: &OpContext, config: &Attrs) -> Result<(String, Attrs)> {
        let name = config.str_attr("name").unwrap_or_default();
        let segments = ctx.client().isolation_segments();
        segments.require_supported()?;
        let segment = segments
            .find_by_name(name)
            .await?
            .ok_or_else(|| not_found(self.schema.type_name, format!("{:?}", name)))?;
        let guid = segment
            .get("guid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok((guid, to_state(&self.schema, &segment, &Attrs::new())))
    }
}

/// Managed instance first, then user-provided, within one space.
pub struct ServiceInstanceLookup {
    schema: Schema,
}

impl ServiceInstanceLookup {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_service_instance",
                vec![
                    Attribute::string("name").required(),
                    Attribute::string("space")
                        .required()
                        .unmapped()
                        .relation(RelationKind::Space),
                    Attribute::string("service_plan")
                        .computed()
                        .field("service_plan_guid"),
                    Attribute::set("tags").computed(),
                    Attribute::bool("user_provided").computed().unmapped(),
                ],
            ),
        }
    }
}

#[async_trait]
impl DataSource for ServiceInstanceLookup {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, ctx: &OpContext, config: &Attrs) -> Result<(String, Attrs)> {
        let name = config.str_attr("name").unwrap_or_default();
        let space = config.str_attr("space").unwrap_or_default();
        let space = ctx
            .resolver
            .resolve("space", RelationKind::Space, space, None)
            .await?;
        let in_space = || V2Query::new().eq("space_guid", &space);

        let client = ctx.client();
        let (instance, user_provided) =
            match client.service_instances().find_by_name(name, in_space()).await? {
                Some(instance) => (instance, false),
                None => {
                    let instance = client
                        .user_provided_services()
                        .find_by_name(name, in_space())
                        .await?
                        .ok_or_else(|| {
                            not_found(self.schema.type_name, format!("{:?} in space {}", name, space))
                        })?;
                    (instance, true)
                }
            };
        let mut attrs = to_state(&self.schema, &instance.entity, &Attrs::new());
        attrs.insert("user_provided".into(), json!(user_provided));
        Ok((instance.metadata.guid, attrs))
    }
}

/// A plan by offering label and plan name
pub struct ServicePlanLookup {
    schema: Schema,
}

impl ServicePlanLookup {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_service_plan",
                vec![
                    Attribute::string("service").required().unmapped(),
                    Attribute::string("name").required(),
                    Attribute::string("broker")
                        .unmapped()
                        .relation(RelationKind::ServiceBroker),
                    Attribute::string("description").computed(),
                    Attribute::bool("free").computed(),
                    Attribute::bool("public").computed(),
                ],
            ),
        }
    }
}

#[async_trait]
impl DataSource for ServicePlanLookup {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, ctx: &OpContext, config: &Attrs) -> Result<(String, Attrs)> {
        let service = config.str_attr("service").unwrap_or_default();
        let name = config.str_attr("name").unwrap_or_default();
        let broker = match config.str_attr("broker") {
            Some(broker) => Some(
                ctx.resolver
                    .resolve("broker", RelationKind::ServiceBroker, broker, None)
                    .await?,
            ),
            None => None,
        };
        let plan = ctx
            .client()
            .service_plans()
            .find_plan(service, name, broker.as_deref())
            .await?
            .ok_or_else(|| {
                not_found(self.schema.type_name, format!("{:?} of service {:?}", name, service))
            })?;
        Ok((
            plan.metadata.guid.clone(),
            to_state(&self.schema, &plan.entity, &Attrs::new()),
        ))
    }
}

/// Service offering by label with its plans, keyed by plan name
pub struct ServiceLookup {
    schema: Schema,
}

impl ServiceLookup {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_service",
                vec![
                    Attribute::string("name").required().field("label"),
                    Attribute::string("space")
                        .unmapped()
                        .relation(RelationKind::Space),
                    Attribute::string("description").computed(),
                    Attribute::map("service_plans").computed().unmapped(),
                ],
            ),
        }
    }
}

/// Plan names as map keys; dots are not allowed there.
fn plan_key(name: &str) -> String {
    name.replace('.', "_")
}

#[async_trait]
impl DataSource for ServiceLookup {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, ctx: &OpContext, config: &Attrs) -> Result<(String, Attrs)> {
        let name = config.str_attr("name").unwrap_or_default();
        let plans = ctx.client().service_plans();
        let service = match config.str_attr("space") {
            Some(space) => {
                let space = ctx
                    .resolver
                    .resolve("space", RelationKind::Space, space, None)
                    .await?;
                let offered = ctx
                    .client()
                    .spaces()
                    .related(&space, "services", V2Query::new().eq("label", name));
                pagination::find_first(offered, |s| s.str_field("label") == Some(name)).await?
            }
            None => plans.find_service(name, None).await?,
        }
        .ok_or_else(|| not_found(self.schema.type_name, format!("{:?}", name)))?;

        let mut by_name = serde_json::Map::new();
        for plan in plans.plans_of(service.guid()).await? {
            let plan_name = plan.str_field("name").unwrap_or_default();
            by_name.insert(plan_key(plan_name), json!(plan.metadata.guid));
        }
        let mut attrs = to_state(&self.schema, &service.entity, &Attrs::new());
        attrs.insert("service_plans".into(), Value::Object(by_name));
        Ok((service.metadata.guid, attrs))
    }
}

/// Routing API router group by name
pub struct RouterGroupLookup {
    schema: Schema,
}

impl RouterGroupLookup {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_router_group",
                vec![
                    Attribute::string("name").required(),
                    Attribute::string("type").computed(),
                    Attribute::string("reservable_ports").computed(),
                ],
            ),
        }
    }
}

#[async_trait]
impl DataSource for RouterGroupLookup {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, ctx: &OpContext, config: &Attrs) -> Result<(String, Attrs)> {
        let name = config.str_attr("name").unwrap_or_default();
        let group = ctx
            .client()
            .router_groups()
            .find_by_name(name)
            .await?
            .ok_or_else(|| not_found(self.schema.type_name, format!("{:?}", name)))?;
        let mut attrs = Attrs::new();
        attrs.insert("name".into(), json!(group.name));
        attrs.insert("type".into(), json!(group.kind));
        if let Some(ports) = group.reservable_ports {
            attrs.insert("reservable_ports".into(), json!(ports));
        }
        Ok((group.guid, attrs))
    }
}

/// UAA user by user name and origin
pub struct UserLookup {
    schema: Schema,
}

impl UserLookup {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_user",
                vec![
                    Attribute::string("name").required().field("userName"),
                    Attribute::string("origin").optional_computed(),
                    Attribute::string("given_name").computed().field("name.givenName"),
                    Attribute::string("family_name").computed().field("name.familyName"),
                    Attribute::string("email").computed().unmapped(),
                ],
            ),
        }
    }
}

#[async_trait]
impl DataSource for UserLookup {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, ctx: &OpContext, config: &Attrs) -> Result<(String, Attrs)> {
        let name = config.str_attr("name").unwrap_or_default();
        let user = ctx
            .client()
            .users()
            .find_scim(name, config.str_attr("origin"))
            .await?
            .ok_or_else(|| not_found(self.schema.type_name, format!("{:?}", name)))?;
        let id = user
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut attrs = to_state(&self.schema, &user, &Attrs::new());
        if let Some(email) = user.pointer("/emails/0/value") {
            attrs.insert("email".into(), email.clone());
        }
        Ok((id, attrs))
    }
}
