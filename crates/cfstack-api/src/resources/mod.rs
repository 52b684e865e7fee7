//! Per-kind API clients
//!
//! Entities travel as `serde_json::Value` so the resource layer can map
//! them through its attribute tables. [`V2Collection`] and [`V3Collection`]
//! carry the CRUD every kind shares; the kind modules add relationship
//! operations on top and deref to their collection.

/// Deref a kind client to its collection.
macro_rules! collection_deref {
    ($kind:ty, $target:ty) => {
        impl std::ops::Deref for $kind {
            type Target = $target;

            fn deref(&self) -> &$target {
                &self.collection
            }
        }
    };
}
pub(crate) use collection_deref;

pub mod apps;
pub mod domains;
pub mod feature_flags;
pub mod info;
pub mod isolation_segments;
pub mod logs;
pub mod network_policies;
pub mod organizations;
pub mod quotas;
pub mod router_groups;
pub mod routes;
pub mod service_brokers;
pub mod service_instances;
pub mod spaces;
pub mod users;

use crate::client::{CfClient, Request};
use crate::error::Result;
use crate::job;
use crate::pagination::{self, V2, V2Query};
use futures_util::stream::BoxStream;
use serde_json::Value;
use tracing::debug;

pub use apps::Apps;
pub use domains::Domains;
pub use feature_flags::FeatureFlags;
pub use isolation_segments::IsolationSegments;
pub use network_policies::{NetworkPolicies, NetworkPolicy};
pub use organizations::{OrgRole, Organizations};
pub use quotas::{OrgQuotas, SpaceQuotas};
pub use router_groups::{RouterGroup, RouterGroups};
pub use routes::Routes;
pub use service_brokers::ServiceBrokers;
pub use service_instances::{
    ServiceInstances, ServiceKeys, ServicePlanVisibilities, ServicePlans, UserProvidedServices,
};
pub use spaces::{SecurityGroups, SpaceRole, Spaces};
pub use users::Users;

/// Flags for v2 deletes
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    pub recursive: bool,
    pub purge: bool,
    /// Ask for a background job and wait for it.
    pub async_job: bool,
}

impl DeleteOptions {
    pub fn background() -> Self {
        Self {
            async_job: true,
            ..Default::default()
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn purge(mut self, purge: bool) -> Self {
        self.purge = purge;
        self
    }

    fn apply(&self, mut request: Request) -> Request {
        if self.async_job {
            request = request.query("async", "true");
        }
        if self.recursive {
            request = request.query("recursive", "true");
        }
        if self.purge {
            request = request.query("purge", "true");
        }
        request
    }
}

impl V2<Value> {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.entity.get(name).and_then(Value::as_str)
    }
}

/// CRUD over one v2 collection such as `/v2/organizations`
#[derive(Clone)]
pub struct V2Collection {
    client: CfClient,
    path: &'static str,
}

impl V2Collection {
    pub fn new(client: &CfClient, path: &'static str) -> Self {
        Self {
            client: client.clone(),
            path,
        }
    }

    pub fn client(&self) -> &CfClient {
        &self.client
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn item_path(&self, guid: &str) -> String {
        format!("{}/{}", self.path, guid)
    }

    pub fn list(&self, query: V2Query) -> BoxStream<'static, Result<V2<Value>>> {
        pagination::v2_stream(&self.client, query.apply(Request::get(self.path)))
    }

    /// Entity whose `name` equals `name` exactly.
    pub async fn find_by_name(&self, name: &str, scope: V2Query) -> Result<Option<V2<Value>>> {
        self.find_by_field("name", name, scope).await
    }

    pub async fn find_by_field(
        &self,
        field: &str,
        value: &str,
        scope: V2Query,
    ) -> Result<Option<V2<Value>>> {
        let query = scope.eq(field, value);
        pagination::find_first(self.list(query), |e| e.str_field(field) == Some(value)).await
    }

    pub async fn get(&self, guid: &str) -> Result<V2<Value>> {
        self.client.get_json(self.item_path(guid)).await
    }

    pub async fn create(&self, body: Value) -> Result<V2<Value>> {
        self.client
            .request_json(Request::post(self.path).json(body))
            .await
    }

    pub async fn update(&self, guid: &str, body: Value) -> Result<V2<Value>> {
        self.client
            .request_json(Request::put(self.item_path(guid)).json(body))
            .await
    }

    /// Delete and wait for any background job. An entity that is already
    /// gone counts as deleted.
    pub async fn delete(&self, guid: &str, options: DeleteOptions) -> Result<()> {
        let request = options.apply(Request::delete(self.item_path(guid)));
        match job::send_and_wait(&self.client, request).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(path = self.path, guid, "already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// `PUT {path}/{guid}/{relation}/{other}`
    pub async fn associate(&self, guid: &str, relation: &str, other: &str) -> Result<()> {
        let path = format!("{}/{}/{}", self.item_path(guid), relation, other);
        self.client.send(Request::put(path)).await?;
        Ok(())
    }

    /// `DELETE {path}/{guid}/{relation}/{other}`; a missing edge is not an error.
    pub async fn dissociate(&self, guid: &str, relation: &str, other: &str) -> Result<()> {
        let path = format!("{}/{}/{}", self.item_path(guid), relation, other);
        match self.client.send(Request::delete(path)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn related(
        &self,
        guid: &str,
        relation: &str,
        query: V2Query,
    ) -> BoxStream<'static, Result<V2<Value>>> {
        let path = format!("{}/{}", self.item_path(guid), relation);
        pagination::v2_stream(&self.client, query.apply(Request::get(path)))
    }

    /// Guids of every entity under `{path}/{guid}/{relation}`.
    pub async fn related_guids(&self, guid: &str, relation: &str) -> Result<Vec<String>> {
        let related = pagination::collect_all(self.related(guid, relation, V2Query::new())).await?;
        Ok(related.into_iter().map(|e| e.metadata.guid).collect())
    }
}

/// CRUD over one v3 collection such as `/v3/isolation_segments`
#[derive(Clone)]
pub struct V3Collection {
    client: CfClient,
    path: &'static str,
}

impl V3Collection {
    pub fn new(client: &CfClient, path: &'static str) -> Self {
        Self {
            client: client.clone(),
            path,
        }
    }

    pub fn client(&self) -> &CfClient {
        &self.client
    }

    pub fn item_path(&self, guid: &str) -> String {
        format!("{}/{}", self.path, guid)
    }

    /// `query` uses v3 structured filters, e.g. `names=foo`.
    pub fn list(&self, query: &[(&str, &str)]) -> BoxStream<'static, Result<Value>> {
        let mut request = Request::get(self.path);
        for (k, v) in query {
            request = request.query(*k, *v);
        }
        pagination::v3_stream(&self.client, request)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Value>> {
        pagination::find_first(self.list(&[("names", name)]), |e| {
            e.get("name").and_then(Value::as_str) == Some(name)
        })
        .await
    }

    pub async fn get(&self, guid: &str) -> Result<Value> {
        self.client.get_json(self.item_path(guid)).await
    }

    pub async fn create(&self, body: Value) -> Result<Value> {
        self.client
            .request_json(Request::post(self.path).json(body))
            .await
    }

    pub async fn update(&self, guid: &str, body: Value) -> Result<Value> {
        self.client
            .request_json(Request::patch(self.item_path(guid)).json(body))
            .await
    }

    pub async fn delete(&self, guid: &str) -> Result<()> {
        match job::send_and_wait(&self.client, Request::delete(self.item_path(guid))).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl CfClient {
    pub fn organizations(&self) -> Organizations {
        Organizations::new(self)
    }

    pub fn spaces(&self) -> Spaces {
        Spaces::new(self)
    }

    pub fn apps(&self) -> Apps {
        Apps::new(self)
    }

    pub fn routes(&self) -> Routes {
        Routes::new(self)
    }

    pub fn domains(&self) -> Domains {
        Domains::new(self)
    }

    pub fn service_instances(&self) -> ServiceInstances {
        ServiceInstances::new(self)
    }

    pub fn user_provided_services(&self) -> UserProvidedServices {
        UserProvidedServices::new(self)
    }

    pub fn service_keys(&self) -> ServiceKeys {
        ServiceKeys::new(self)
    }

    pub fn service_plans(&self) -> ServicePlans {
        ServicePlans::new(self)
    }

    pub fn service_plan_visibilities(&self) -> ServicePlanVisibilities {
        ServicePlanVisibilities::new(self)
    }

    pub fn service_brokers(&self) -> ServiceBrokers {
        ServiceBrokers::new(self)
    }

    pub fn users(&self) -> Users {
        Users::new(self)
    }

    pub fn org_quotas(&self) -> OrgQuotas {
        OrgQuotas::new(self)
    }

    pub fn space_quotas(&self) -> SpaceQuotas {
        SpaceQuotas::new(self)
    }

    pub fn security_groups(&self) -> SecurityGroups {
        SecurityGroups::new(self)
    }

    pub fn isolation_segments(&self) -> IsolationSegments {
        IsolationSegments::new(self)
    }

    pub fn network_policies(&self) -> NetworkPolicies {
        NetworkPolicies::new(self)
    }

    pub fn feature_flags(&self) -> FeatureFlags {
        FeatureFlags::new(self)
    }

    pub fn router_groups(&self) -> RouterGroups {
        RouterGroups::new(self)
    }

    pub fn stacks(&self) -> V2Collection {
        V2Collection::new(self, "/v2/stacks")
    }
}
