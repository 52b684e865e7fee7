//! Applications: bits, staging, instances, route and service bindings

use super::{V2Collection, collection_deref};
use crate::bits::Bits;
use crate::client::{CfClient, Request};
use crate::error::Result;
use crate::http::Upload;
use crate::job::{self, PollStatus, poll_until};
use crate::pagination::{self, V2, V2Query};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub const STATE_STARTED: &str = "STARTED";
pub const STATE_STOPPED: &str = "STOPPED";

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceState {
    pub state: String,
    #[serde(default)]
    pub details: Option<String>,
}

/// Service binding edge as seen from the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBinding {
    pub guid: String,
    pub service_instance_guid: String,
}

pub struct Apps {
    collection: V2Collection,
}

collection_deref!(Apps, V2Collection);

impl Apps {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/apps"),
        }
    }

    /// Upload the packaged bits and wait for the upload job.
    pub async fn upload_bits(&self, app: &str, bits: &Bits) -> Result<()> {
        let upload = Upload {
            field: "application".into(),
            file_name: "application.zip".into(),
            path: bits.path().to_path_buf(),
            fields: vec![("resources".into(), "[]".into())],
        };
        let request = Request::put(format!("{}/bits", self.item_path(app)))
            .query("async", "true")
            .upload(upload);
        job::send_and_wait(self.client(), request).await?;
        info!(app, "uploaded bits");
        Ok(())
    }

    /// Copy the package of `source` into `app` and wait for the copy job.
    pub async fn copy_bits(&self, app: &str, source: &str) -> Result<()> {
        let request = Request::post(format!("{}/copy_bits", self.item_path(app)))
            .json(json!({ "source_app_guid": source }));
        job::send_and_wait(self.client(), request).await?;
        info!(app, source, "copied bits");
        Ok(())
    }

    pub async fn rename(&self, app: &str, name: &str) -> Result<()> {
        self.update(app, json!({ "name": name })).await?;
        Ok(())
    }

    pub async fn set_state(&self, app: &str, state: &str) -> Result<V2<Value>> {
        self.update(app, json!({ "state": state })).await
    }

    pub async fn restage(&self, app: &str) -> Result<V2<Value>> {
        let path = format!("{}/restage", self.item_path(app));
        self.client().request_json(Request::post(path)).await
    }

    /// Wait for the current package to finish staging.
    pub async fn wait_staged(&self, app: &str, timeout: Duration) -> Result<()> {
        let config = self.client().poll_config().with_deadline(timeout);
        poll_until(&config, app, || async {
            let entity = self.get(app).await?;
            Ok(match entity.str_field("package_state").unwrap_or("PENDING") {
                "STAGED" => PollStatus::Done(()),
                "FAILED" => PollStatus::Failed(format!(
                    "staging failed: {} {}",
                    entity.str_field("staging_failed_reason").unwrap_or_default(),
                    entity.str_field("staging_failed_description").unwrap_or_default(),
                )
                .trim()
                .to_string()),
                other => PollStatus::Pending(other.to_string()),
            })
        })
        .await
    }

    pub async fn instances(&self, app: &str) -> Result<BTreeMap<String, InstanceState>> {
        let path = format!("{}/instances", self.item_path(app));
        self.client().get_json(path).await
    }

    /// Wait until `expected_instances` instances are running.
    ///
    /// Instances still `STARTING` or `DOWN` keep the wait pending; any other
    /// non-running state fails it. An app scaled to zero instances is done
    /// immediately.
    pub async fn wait_running(&self, app: &str, expected_instances: i64, timeout: Duration) -> Result<()> {
        if expected_instances <= 0 {
            return Ok(());
        }
        let config = self.client().poll_config().with_deadline(timeout);
        poll_until(&config, app, || async {
            let instances = match self.instances(app).await {
                Ok(instances) => instances,
                // Reported while the droplet is still being placed.
                Err(e) if e.platform_kind().is_some() && !e.is_not_found() => {
                    return Ok(PollStatus::Pending(e.to_string()));
                }
                Err(e) => return Err(e),
            };
            Ok(running_status(&instances, expected_instances))
        })
        .await
    }

    pub async fn route_guids(&self, app: &str) -> Result<Vec<String>> {
        self.related_guids(app, "routes").await
    }

    /// Map `route` to `app` (`PUT /v2/routes/:route/apps/:app`).
    pub async fn bind_route(&self, app: &str, route: &str) -> Result<()> {
        self.client()
            .send(Request::put(format!("/v2/routes/{}/apps/{}", route, app)))
            .await?;
        Ok(())
    }

    pub async fn unbind_route(&self, app: &str, route: &str) -> Result<()> {
        let request = Request::delete(format!("/v2/routes/{}/apps/{}", route, app));
        match self.client().send(request).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn service_bindings(&self, app: &str) -> Result<Vec<ServiceBinding>> {
        let bindings =
            pagination::collect_all(self.related(app, "service_bindings", V2Query::new())).await?;
        Ok(bindings
            .into_iter()
            .map(|b| ServiceBinding {
                service_instance_guid: b
                    .str_field("service_instance_guid")
                    .unwrap_or_default()
                    .to_string(),
                guid: b.metadata.guid,
            })
            .collect())
    }

    pub async fn bind_service(&self, app: &str, service_instance: &str, params: Option<Value>) -> Result<String> {
        let mut body = json!({
            "app_guid": app,
            "service_instance_guid": service_instance,
        });
        if let Some(params) = params {
            body["parameters"] = params;
        }
        let binding: V2<Value> = self
            .client()
            .request_json(Request::post("/v2/service_bindings").json(body))
            .await?;
        Ok(binding.metadata.guid)
    }

    pub async fn unbind_service(&self, binding: &str) -> Result<()> {
        V2Collection::new(self.client(), "/v2/service_bindings")
            .delete(binding, super::DeleteOptions::background())
            .await
    }
}

fn running_status(instances: &BTreeMap<String, InstanceState>, expected: i64) -> PollStatus<()> {
    let mut running = 0;
    for (index, instance) in instances {
        match instance.state.as_str() {
            "RUNNING" => running += 1,
            "STARTING" | "DOWN" => {}
            other => {
                return PollStatus::Failed(format!(
                    "instance {} failed with state {}",
                    index, other
                ));
            }
        }
    }
    if running >= expected {
        PollStatus::Done(())
    } else {
        PollStatus::Pending(format!("{}/{} instances running", running, expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::http::Body;
    use crate::testing::{FakePlatform, client_for};

    #[tokio::test]
    async fn test_upload_bits_waits_for_job() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.zip"), b"PK").unwrap();
        let bits = crate::bits::prepare(&dir.path().join("app.zip")).await.unwrap();

        let fake = FakePlatform::with_defaults();
        fake.respond(
            "PUT",
            "/v2/apps/a1/bits",
            201,
            json!({"metadata": {"guid": "j1", "url": "/v2/jobs/j1"}, "entity": {"status": "queued"}}),
        );
        fake.respond("GET", "/v2/jobs/j1", 200, json!({"entity": {"status": "running"}}));
        fake.respond("GET", "/v2/jobs/j1", 200, json!({"entity": {"status": "finished"}}));
        let client = client_for(&fake).await;

        client.apps().upload_bits("a1", &bits).await.unwrap();

        let upload = fake.requests_to("PUT", "/v2/apps/a1/bits?async=true");
        assert_eq!(upload.len(), 1);
        let Body::Upload(u) = &upload[0].body else {
            panic!("expected multipart upload");
        };
        assert_eq!(u.field, "application");
        assert_eq!(fake.count("GET", "/v2/jobs/j1"), 2);
    }

    #[tokio::test]
    async fn test_staging_failure() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            "/v2/apps/a1",
            200,
            json!({"metadata": {"guid": "a1"}, "entity": {"package_state": "FAILED", "staging_failed_reason": "BuildpackCompileFailed", "staging_failed_description": "App staging failed"}}),
        );
        let client = client_for(&fake).await;

        let err = client
            .apps()
            .wait_staged("a1", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::JobFailed { ref message, .. } if message.contains("BuildpackCompileFailed")));
    }

    #[tokio::test]
    async fn test_wait_running() {
        let fake = FakePlatform::with_defaults();
        fake.respond("GET", "/v2/apps/a1/instances", 200, json!({"0": {"state": "STARTING"}}));
        fake.respond("GET", "/v2/apps/a1/instances", 200, json!({"0": {"state": "RUNNING"}}));
        let client = client_for(&fake).await;

        client.apps().wait_running("a1", 1, Duration::from_secs(5)).await.unwrap();
        assert_eq!(fake.count("GET", "/v2/apps/a1/instances"), 2);
    }

    #[tokio::test]
    async fn test_wait_running_needs_every_instance() {
        let fake = FakePlatform::with_defaults();
        let path = "/v2/apps/a1/instances";
        fake.respond("GET", path, 200, json!({"0": {"state": "RUNNING"}, "1": {"state": "STARTING"}}));
        fake.respond("GET", path, 200, json!({"0": {"state": "RUNNING"}}));
        fake.respond("GET", path, 200, json!({"0": {"state": "RUNNING"}, "1": {"state": "RUNNING"}}));
        let client = client_for(&fake).await;

        client.apps().wait_running("a1", 2, Duration::from_secs(5)).await.unwrap();
        assert_eq!(fake.count("GET", path), 3);
    }

    #[test]
    fn test_running_status() {
        let states = |pairs: &[(&str, &str)]| -> BTreeMap<String, InstanceState> {
            pairs
                .iter()
                .map(|(i, s)| {
                    (i.to_string(), InstanceState { state: s.to_string(), details: None })
                })
                .collect()
        };
        assert!(matches!(
            running_status(&states(&[("0", "RUNNING"), ("1", "DOWN")]), 2),
            PollStatus::Pending(ref m) if m == "1/2 instances running"
        ));
        assert!(matches!(
            running_status(&states(&[("0", "RUNNING"), ("1", "FLAPPING")]), 2),
            PollStatus::Failed(ref m) if m.contains("FLAPPING")
        ));
        assert!(matches!(
            running_status(&states(&[("0", "RUNNING"), ("1", "RUNNING")]), 2),
            PollStatus::Done(())
        ));
        assert!(matches!(running_status(&states(&[]), 1), PollStatus::Pending(_)));
    }

    #[tokio::test]
    async fn test_crashed_instance_fails() {
        let fake = FakePlatform::with_defaults();
        fake.respond("GET", "/v2/apps/a1/instances", 200, json!({"0": {"state": "CRASHED"}}));
        let client = client_for(&fake).await;

        let err = client
            .apps()
            .wait_running("a1", 1, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::JobFailed { ref message, .. } if message.contains("CRASHED")));
    }
}
