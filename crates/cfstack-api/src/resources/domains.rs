use super::V2Collection;
use crate::client::CfClient;
use crate::error::Result;
use crate::pagination::{V2, V2Query};
use serde_json::Value;

/// Whether a domain is shared by all orgs or owned by one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainScope {
    Shared,
    Private,
}

/// Shared and private domains live in separate collections.
pub struct Domains {
    pub shared: V2Collection,
    pub private: V2Collection,
}

impl Domains {
    pub fn new(client: &CfClient) -> Self {
        Self {
            shared: V2Collection::new(client, "/v2/shared_domains"),
            private: V2Collection::new(client, "/v2/private_domains"),
        }
    }

    pub fn collection(&self, scope: DomainScope) -> &V2Collection {
        match scope {
            DomainScope::Shared => &self.shared,
            DomainScope::Private => &self.private,
        }
    }

    /// Look a domain up by guid in either collection.
    pub async fn get(&self, guid: &str) -> Result<(DomainScope, V2<Value>)> {
        match self.shared.get(guid).await {
            Ok(domain) => Ok((DomainScope::Shared, domain)),
            Err(e) if e.is_not_found() => Ok((DomainScope::Private, self.private.get(guid).await?)),
            Err(e) => Err(e),
        }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<(DomainScope, V2<Value>)>> {
        if let Some(domain) = self.shared.find_by_name(name, V2Query::new()).await? {
            return Ok(Some((DomainScope::Shared, domain)));
        }
        Ok(self
            .private
            .find_by_name(name, V2Query::new())
            .await?
            .map(|d| (DomainScope::Private, d)))
    }
}
