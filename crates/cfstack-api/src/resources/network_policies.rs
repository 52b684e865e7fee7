//! Container-to-container network policies (networking API v1)

use crate::catalog::Endpoint;
use crate::client::{CfClient, Request};
use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySource {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDestination {
    pub id: String,
    pub protocol: String,
    pub ports: Ports,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub source: PolicySource,
    pub destination: PolicyDestination,
}

impl NetworkPolicy {
    pub fn new(source_app: &str, destination_app: &str, protocol: &str, ports: Ports) -> Self {
        Self {
            source: PolicySource {
                id: source_app.to_string(),
            },
            destination: PolicyDestination {
                id: destination_app.to_string(),
                protocol: protocol.to_string(),
                ports,
            },
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Policies {
    #[serde(default)]
    policies: Vec<NetworkPolicy>,
}

pub struct NetworkPolicies {
    client: CfClient,
}

impl NetworkPolicies {
    pub fn new(client: &CfClient) -> Self {
        Self {
            client: client.clone(),
        }
    }

    /// Policies touching any of `app_guids` (as source or destination).
    pub async fn list(&self, app_guids: &[&str]) -> Result<Vec<NetworkPolicy>> {
        let mut request = Request::get("/policies").on(Endpoint::NetworkPolicy);
        if !app_guids.is_empty() {
            request = request.query("id", app_guids.join(","));
        }
        let body: Policies = self.client.request_json(request).await?;
        Ok(body.policies)
    }

    pub async fn create(&self, policies: Vec<NetworkPolicy>) -> Result<()> {
        let body = serde_json::to_value(Policies { policies })?;
        self.client
            .send(Request::post("/policies").on(Endpoint::NetworkPolicy).json(body))
            .await?;
        Ok(())
    }

    pub async fn delete(&self, policies: Vec<NetworkPolicy>) -> Result<()> {
        let body = serde_json::to_value(Policies { policies })?;
        self.client
            .send(
                Request::post("/policies/delete")
                    .on(Endpoint::NetworkPolicy)
                    .json(body),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, client_for};
    use serde_json::json;

    #[tokio::test]
    async fn test_list_filters_by_app() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            "/networking/v1/external/policies",
            200,
            json!({"total_policies": 1, "policies": [{
                "source": {"id": "a1"},
                "destination": {"id": "a2", "protocol": "tcp", "ports": {"start": 8080, "end": 8080}},
            }]}),
        );
        let client = client_for(&fake).await;

        let policies = client.network_policies().list(&["a1"]).await.unwrap();
        assert_eq!(
            policies,
            vec![NetworkPolicy::new("a1", "a2", "tcp", Ports { start: 8080, end: 8080 })]
        );
        assert_eq!(fake.count("GET", "/networking/v1/external/policies?id=a1"), 1);
    }
}
