use crate::client::CfClient;
use crate::error::Result;
use serde::Deserialize;

/// `GET /v2/info`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub authorization_endpoint: String,
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub doppler_logging_endpoint: String,
    #[serde(default)]
    pub routing_endpoint: Option<String>,
    #[serde(default)]
    pub min_cli_version: Option<String>,
}

pub async fn get(client: &CfClient) -> Result<PlatformInfo> {
    client.get_json("/v2/info").await
}
