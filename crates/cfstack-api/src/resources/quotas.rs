use super::{V2Collection, collection_deref};
use crate::client::CfClient;
use crate::error::Result;

pub struct OrgQuotas {
    collection: V2Collection,
}

collection_deref!(OrgQuotas, V2Collection);

impl OrgQuotas {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/quota_definitions"),
        }
    }
}

pub struct SpaceQuotas {
    collection: V2Collection,
}

collection_deref!(SpaceQuotas, V2Collection);

impl SpaceQuotas {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/space_quota_definitions"),
        }
    }

    /// Space quotas are assigned from the quota side.
    pub async fn assign(&self, quota: &str, space: &str) -> Result<()> {
        self.associate(quota, "spaces", space).await
    }

    pub async fn unassign(&self, quota: &str, space: &str) -> Result<()> {
        self.dissociate(quota, "spaces", space).await
    }
}
