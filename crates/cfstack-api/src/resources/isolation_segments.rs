//! Isolation segments and their org entitlements (v3 only)

use super::{V3Collection, collection_deref};
use crate::catalog::ApiVersion;
use crate::client::{CfClient, Request};
use crate::error::Result;
use serde_json::{Value, json};

/// First v3 version serving isolation segments.
pub const MINIMUM_VERSION: ApiVersion = ApiVersion::new(3, 11, 0);

pub struct IsolationSegments {
    collection: V3Collection,
}

collection_deref!(IsolationSegments, V3Collection);

impl IsolationSegments {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V3Collection::new(client, "/v3/isolation_segments"),
        }
    }

    /// Fail early when the platform is too old.
    pub fn require_supported(&self) -> Result<()> {
        self.client().catalog().require_v3(MINIMUM_VERSION)
    }

    fn orgs_path(&self, segment: &str) -> String {
        format!("{}/relationships/organizations", self.item_path(segment))
    }

    pub async fn entitled_orgs(&self, segment: &str) -> Result<Vec<String>> {
        self.require_supported()?;
        let body: Value = self.client().get_json(self.orgs_path(segment)).await?;
        let mut guids: Vec<String> = body
            .get("data")
            .and_then(Value::as_array)
            .map(|data| {
                data.iter()
                    .filter_map(|d| d.get("guid").and_then(Value::as_str).map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        guids.sort();
        Ok(guids)
    }

    pub async fn entitle_orgs(&self, segment: &str, orgs: &[String]) -> Result<()> {
        self.require_supported()?;
        if orgs.is_empty() {
            return Ok(());
        }
        let data: Vec<Value> = orgs.iter().map(|g| json!({ "guid": g })).collect();
        self.client()
            .send(Request::post(self.orgs_path(segment)).json(json!({ "data": data })))
            .await?;
        Ok(())
    }

    pub async fn revoke_org(&self, segment: &str, org: &str) -> Result<()> {
        self.require_supported()?;
        let path = format!("{}/{}", self.orgs_path(segment), org);
        match self.client().send(Request::delete(path)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, client_for};

    #[tokio::test]
    async fn test_entitle_and_list() {
        let fake = FakePlatform::with_defaults();
        fake.respond("POST", "/v3/isolation_segments/iso1/relationships/organizations", 200, json!({}));
        fake.respond(
            "GET",
            "/v3/isolation_segments/iso1/relationships/organizations",
            200,
            json!({"data": [{"guid": "o2"}, {"guid": "o1"}]}),
        );
        let client = client_for(&fake).await;
        let segments = client.isolation_segments();

        segments
            .entitle_orgs("iso1", &["o1".to_string(), "o2".to_string()])
            .await
            .unwrap();
        assert_eq!(segments.entitled_orgs("iso1").await.unwrap(), vec!["o1", "o2"]);
    }
}
