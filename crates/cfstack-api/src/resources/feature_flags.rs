//! Platform feature flags (`/v2/config/feature_flags`)

use crate::client::{CfClient, Request};
use crate::error::Result;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Deserialize)]
struct Flag {
    name: String,
    enabled: bool,
}

const PATH: &str = "/v2/config/feature_flags";

pub struct FeatureFlags {
    client: CfClient,
}

impl FeatureFlags {
    pub fn new(client: &CfClient) -> Self {
        Self {
            client: client.clone(),
        }
    }

    /// Every flag the platform knows, by name.
    pub async fn list(&self) -> Result<BTreeMap<String, bool>> {
        let flags: Vec<Flag> = self.client.get_json(PATH).await?;
        Ok(flags.into_iter().map(|f| (f.name, f.enabled)).collect())
    }

    pub async fn set(&self, name: &str, enabled: bool) -> Result<()> {
        self.client
            .send(Request::put(format!("{}/{}", PATH, name)).json(json!({ "enabled": enabled })))
            .await?;
        info!(flag = name, enabled, "feature flag set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, client_for};

    #[tokio::test]
    async fn test_list_and_set() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            PATH,
            200,
            json!([
                {"name": "diego_docker", "enabled": false, "error_message": null, "url": "/v2/config/feature_flags/diego_docker"},
                {"name": "task_creation", "enabled": true, "error_message": null, "url": "/v2/config/feature_flags/task_creation"},
            ]),
        );
        fake.respond("PUT", "/v2/config/feature_flags/diego_docker", 200, json!({}));
        let client = client_for(&fake).await;
        let flags = client.feature_flags();

        let listed = flags.list().await.unwrap();
        assert_eq!(listed.get("diego_docker"), Some(&false));
        assert_eq!(listed.get("task_creation"), Some(&true));

        flags.set("diego_docker", true).await.unwrap();
        let Some(crate::http::Body::Json(body)) = fake.last_request().map(|r| r.body) else {
            panic!("expected JSON body");
        };
        assert_eq!(body, json!({"enabled": true}));
    }
}
