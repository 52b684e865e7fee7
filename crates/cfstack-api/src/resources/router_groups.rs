//! Router groups of the routing API

use crate::catalog::Endpoint;
use crate::client::{CfClient, Request};
use crate::error::Result;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouterGroup {
    pub guid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reservable_ports: Option<String>,
}

pub struct RouterGroups {
    client: CfClient,
}

impl RouterGroups {
    pub fn new(client: &CfClient) -> Self {
        Self {
            client: client.clone(),
        }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<RouterGroup>> {
        let request = Request::get("/v1/router_groups")
            .on(Endpoint::Routing)
            .query("name", name);
        let groups: Vec<RouterGroup> = match self.client.request_json(request).await {
            Ok(groups) => groups,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(groups.into_iter().find(|g| g.name == name))
    }
}
