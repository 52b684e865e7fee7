//! Managed and user-provided service instances, keys and plans

use super::{DeleteOptions, V2Collection, collection_deref};
use crate::client::{CfClient, Request};
use crate::error::Result;
use crate::job::{PollStatus, poll_until};
use crate::pagination::{self, V2, V2Query};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::info;

/// `last_operation.state` of a managed instance
fn last_operation_status(entity: &V2<Value>) -> PollStatus<()> {
    let op = entity.entity.get("last_operation");
    let state = op
        .and_then(|o| o.get("state"))
        .and_then(Value::as_str)
        .unwrap_or("succeeded");
    match state {
        "succeeded" => PollStatus::Done(()),
        "failed" => PollStatus::Failed(
            op.and_then(|o| o.get("description"))
                .and_then(Value::as_str)
                .unwrap_or("operation failed")
                .to_string(),
        ),
        other => PollStatus::Pending(other.to_string()),
    }
}

pub struct ServiceInstances {
    collection: V2Collection,
}

collection_deref!(ServiceInstances, V2Collection);

impl ServiceInstances {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/service_instances"),
        }
    }

    /// Provision and wait for the broker to finish.
    pub async fn create_and_wait(&self, body: Value, timeout: Duration) -> Result<V2<Value>> {
        let created: V2<Value> = self
            .client()
            .request_json(
                Request::post(self.path())
                    .query("accepts_incomplete", "true")
                    .json(body),
            )
            .await?;
        let guid = created.metadata.guid.clone();
        self.wait_last_operation(&guid, timeout).await?;
        info!(guid = %guid, "service instance provisioned");
        Ok(created)
    }

    pub async fn update_and_wait(&self, guid: &str, body: Value, timeout: Duration) -> Result<()> {
        self.client()
            .send(
                Request::put(self.item_path(guid))
                    .query("accepts_incomplete", "true")
                    .json(body),
            )
            .await?;
        self.wait_last_operation(guid, timeout).await
    }

    /// Deprovision and wait until the instance is gone.
    pub async fn delete_and_wait(
        &self,
        guid: &str,
        options: DeleteOptions,
        timeout: Duration,
    ) -> Result<()> {
        let mut request = Request::delete(self.item_path(guid)).query("accepts_incomplete", "true");
        if options.recursive {
            request = request.query("recursive", "true");
        }
        if options.purge {
            request = request.query("purge", "true");
        }
        let response = match self.client().send(request).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if response.status != 202 {
            return Ok(());
        }

        let config = self.client().poll_config().with_deadline(timeout);
        poll_until(&config, guid, || async {
            match self.get(guid).await {
                Ok(entity) => Ok(last_operation_status(&entity)),
                Err(e) if e.is_not_found() => Ok(PollStatus::Done(())),
                Err(e) => Err(e),
            }
        })
        .await
    }

    pub async fn wait_last_operation(&self, guid: &str, timeout: Duration) -> Result<()> {
        let config = self.client().poll_config().with_deadline(timeout);
        poll_until(&config, guid, || async {
            let entity = self.get(guid).await?;
            Ok(last_operation_status(&entity))
        })
        .await
    }

    fn shared_spaces_path(instance: &str) -> String {
        format!("/v3/service_instances/{}/relationships/shared_spaces", instance)
    }

    /// Spaces the instance is shared into (v3 relationship).
    pub async fn shared_spaces(&self, instance: &str) -> Result<Vec<String>> {
        let body: Value = self
            .client()
            .get_json(Self::shared_spaces_path(instance))
            .await?;
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .map(|data| {
                data.iter()
                    .filter_map(|d| d.get("guid").and_then(Value::as_str).map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn share(&self, instance: &str, space: &str) -> Result<()> {
        self.client()
            .send(
                Request::post(Self::shared_spaces_path(instance))
                    .json(json!({ "data": [{ "guid": space }] })),
            )
            .await?;
        info!(instance, space, "service instance shared");
        Ok(())
    }

    /// Unshare; a space that no longer holds the share is not an error.
    pub async fn unshare(&self, instance: &str, space: &str) -> Result<()> {
        let path = format!("{}/{}", Self::shared_spaces_path(instance), space);
        match self.client().send(Request::delete(path)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

pub struct UserProvidedServices {
    collection: V2Collection,
}

collection_deref!(UserProvidedServices, V2Collection);

impl UserProvidedServices {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/user_provided_service_instances"),
        }
    }
}

pub struct ServiceKeys {
    collection: V2Collection,
}

collection_deref!(ServiceKeys, V2Collection);

impl ServiceKeys {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/service_keys"),
        }
    }
}

/// Service offerings and their plans
pub struct ServicePlans {
    collection: V2Collection,
    pub services: V2Collection,
}

collection_deref!(ServicePlans, V2Collection);

impl ServicePlans {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/service_plans"),
            services: V2Collection::new(client, "/v2/services"),
        }
    }

    /// Service offering by label, optionally limited to one broker.
    pub async fn find_service(&self, label: &str, broker: Option<&str>) -> Result<Option<V2<Value>>> {
        let mut scope = V2Query::new();
        if let Some(broker) = broker {
            scope = scope.eq("service_broker_guid", broker);
        }
        self.services.find_by_field("label", label, scope).await
    }

    pub async fn plans_of(&self, service: &str) -> Result<Vec<V2<Value>>> {
        pagination::collect_all(self.list(V2Query::new().eq("service_guid", service))).await
    }

    /// Make the plan visible to every org, or to none but those with a
    /// visibility.
    pub async fn set_public(&self, plan: &str, public: bool) -> Result<()> {
        self.update(plan, json!({ "public": public })).await?;
        Ok(())
    }

    /// Plan named `plan` of the service labelled `service`.
    pub async fn find_plan(
        &self,
        service: &str,
        plan: &str,
        broker: Option<&str>,
    ) -> Result<Option<V2<Value>>> {
        let Some(offering) = self.find_service(service, broker).await? else {
            return Ok(None);
        };
        Ok(self
            .plans_of(offering.guid())
            .await?
            .into_iter()
            .find(|p| p.str_field("name") == Some(plan)))
    }
}

/// Org-scoped plan access
pub struct ServicePlanVisibilities {
    collection: V2Collection,
}

collection_deref!(ServicePlanVisibilities, V2Collection);

impl ServicePlanVisibilities {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/service_plan_visibilities"),
        }
    }

    pub async fn grant(&self, plan: &str, org: &str) -> Result<V2<Value>> {
        let created = self
            .create(json!({ "service_plan_guid": plan, "organization_guid": org }))
            .await?;
        info!(plan, org, guid = created.guid(), "plan visibility granted");
        Ok(created)
    }

    /// Existing visibility of `plan` for `org`.
    pub async fn find(&self, plan: &str, org: &str) -> Result<Option<V2<Value>>> {
        self.find_by_field(
            "organization_guid",
            org,
            V2Query::new().eq("service_plan_guid", plan),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::testing::{FakePlatform, client_for};
    use serde_json::json;

    fn instance(state: &str, description: &str) -> Value {
        json!({
            "metadata": {"guid": "si1"},
            "entity": {"name": "db", "last_operation": {"type": "delete", "state": state, "description": description}},
        })
    }

    #[tokio::test]
    async fn test_async_delete_until_gone() {
        let fake = FakePlatform::with_defaults();
        fake.respond("DELETE", "/v2/service_instances/si1", 202, instance("in progress", ""));
        fake.respond("GET", "/v2/service_instances/si1", 200, instance("in progress", ""));
        fake.respond(
            "GET",
            "/v2/service_instances/si1",
            404,
            json!({"code": 60004, "error_code": "CF-ServiceInstanceNotFound", "description": "gone"}),
        );
        let client = client_for(&fake).await;

        client
            .service_instances()
            .delete_and_wait("si1", DeleteOptions::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(fake.count("GET", "/v2/service_instances/si1"), 2);
        assert_eq!(
            fake.count("DELETE", "/v2/service_instances/si1?accepts_incomplete=true"),
            1
        );
    }

    #[tokio::test]
    async fn test_async_delete_failure() {
        let fake = FakePlatform::with_defaults();
        fake.respond("DELETE", "/v2/service_instances/si1", 202, instance("in progress", ""));
        fake.respond("GET", "/v2/service_instances/si1", 200, instance("in progress", ""));
        fake.respond("GET", "/v2/service_instances/si1", 200, instance("failed", "binding exists"));
        let client = client_for(&fake).await;

        let err = client
            .service_instances()
            .delete_and_wait("si1", DeleteOptions::default(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::JobFailed { ref message, .. } if message == "binding exists"));
    }

    #[tokio::test]
    async fn test_share_and_unshare() {
        let fake = FakePlatform::with_defaults();
        let path = "/v3/service_instances/si1/relationships/shared_spaces";
        fake.respond("POST", path, 200, json!({"data": [{"guid": "s2"}]}));
        fake.respond("GET", path, 200, json!({"data": [{"guid": "s2"}, {"guid": "s3"}]}));
        let client = client_for(&fake).await;
        let instances = client.service_instances();

        instances.share("si1", "s2").await.unwrap();
        let Some(crate::http::Body::Json(body)) = fake.last_request().map(|r| r.body) else {
            panic!("expected JSON body");
        };
        assert_eq!(body, json!({"data": [{"guid": "s2"}]}));
        assert_eq!(instances.shared_spaces("si1").await.unwrap(), vec!["s2", "s3"]);

        // Unscripted delete reports not found, which counts as unshared.
        instances.unshare("si1", "s9").await.unwrap();
        assert_eq!(fake.count("DELETE", &format!("{}/s9", path)), 1);
    }

    #[tokio::test]
    async fn test_visibility_lookup_is_scoped_to_plan() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            "/v2/service_plan_visibilities",
            200,
            json!({"resources": [
                {"metadata": {"guid": "v1"}, "entity": {"service_plan_guid": "p1", "organization_guid": "o1"}},
                {"metadata": {"guid": "v2"}, "entity": {"service_plan_guid": "p1", "organization_guid": "o2"}},
            ]}),
        );
        let client = client_for(&fake).await;

        let visibility = client
            .service_plan_visibilities()
            .find("p1", "o2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(visibility.guid(), "v2");
        let request = fake.last_request().unwrap();
        assert!(request.url.contains("service_plan_guid"), "{}", request.url);
    }

    #[tokio::test]
    async fn test_find_plan() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            "/v2/services",
            200,
            json!({"resources": [{"metadata": {"guid": "svc1"}, "entity": {"label": "p-mysql"}}]}),
        );
        fake.respond(
            "GET",
            "/v2/service_plans",
            200,
            json!({"resources": [
                {"metadata": {"guid": "p1"}, "entity": {"name": "small"}},
                {"metadata": {"guid": "p2"}, "entity": {"name": "large"}},
            ]}),
        );
        let client = client_for(&fake).await;

        let plan = client
            .service_plans()
            .find_plan("p-mysql", "large", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(plan.guid(), "p2");
    }
}
