//! Configured provider session
//!
//! Built once by `configure` and shared read-only by every operation; the
//! token caches inside the client are the only state that changes.

use crate::error::Result;
use cfstack_api::{CfClient, HttpSend, ReqwestSender, V2Query};
use cfstack_config::ProviderConfig;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Session {
    pub client: CfClient,
    pub config: ProviderConfig,
    /// Org quota applied to orgs created without one.
    pub default_quota_guid: Option<String>,
}

impl Session {
    pub fn new(client: CfClient, config: ProviderConfig) -> Self {
        Self {
            client,
            config,
            default_quota_guid: None,
        }
    }

    /// Connect with the production HTTP stack.
    pub async fn connect(config: ProviderConfig) -> Result<Self> {
        let http: Arc<dyn HttpSend> = Arc::new(ReqwestSender::from_config(&config)?);
        Self::connect_with(config, http).await
    }

    /// Discover endpoints, authenticate, then resolve the default quota.
    pub async fn connect_with(config: ProviderConfig, http: Arc<dyn HttpSend>) -> Result<Self> {
        let client = CfClient::connect(&config, http).await?;
        let default_quota_guid = match client
            .org_quotas()
            .find_by_name(&config.default_quota_name, V2Query::new())
            .await?
        {
            Some(quota) => Some(quota.metadata.guid),
            None => {
                warn!(quota = %config.default_quota_name, "default org quota not found");
                None
            }
        };
        info!(api = %config.api_url, "session ready");
        Ok(Self {
            client,
            config,
            default_quota_guid,
        })
    }
}
