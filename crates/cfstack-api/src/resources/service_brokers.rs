use super::{DeleteOptions, V2Collection, collection_deref};
use crate::client::CfClient;
use crate::error::Result;
use crate::pagination::{self, V2Query};
use std::collections::BTreeMap;
use tracing::info;

pub struct ServiceBrokers {
    collection: V2Collection,
}

collection_deref!(ServiceBrokers, V2Collection);

impl ServiceBrokers {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/service_brokers"),
        }
    }

    fn services(&self) -> V2Collection {
        V2Collection::new(self.client(), "/v2/services")
    }

    /// Plans exposed by the broker, keyed `service/plan` → plan guid.
    pub async fn catalog(&self, broker: &str) -> Result<BTreeMap<String, String>> {
        let services = pagination::collect_all(
            self.services()
                .list(V2Query::new().eq("service_broker_guid", broker)),
        )
        .await?;

        let plans = self.client().service_plans();
        let mut catalog = BTreeMap::new();
        for service in &services {
            let label = service.str_field("label").unwrap_or_default();
            for plan in plans.plans_of(service.guid()).await? {
                let name = plan.str_field("name").unwrap_or_default();
                catalog.insert(format!("{}/{}", label, name), plan.metadata.guid.clone());
            }
        }
        Ok(catalog)
    }

    /// Purge every service offering of the broker, then delete it.
    ///
    /// Purging drops the offerings and their instances from the platform
    /// without contacting the broker.
    pub async fn purge_and_delete(&self, broker: &str) -> Result<()> {
        let services = pagination::collect_all(
            self.services()
                .list(V2Query::new().eq("service_broker_guid", broker)),
        )
        .await?;
        for service in &services {
            info!(broker, service = service.guid(), "purging service offering");
            self.services()
                .delete(service.guid(), DeleteOptions::default().purge(true))
                .await?;
        }
        self.delete(broker, DeleteOptions::default()).await
    }
}
