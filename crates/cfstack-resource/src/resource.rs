//! Resource and data source traits
//!
//! Kinds implement the raw platform calls; the dispatcher wraps them with
//! validation, relation expansion, read-after-write and drift checks.

use crate::diff::ChangeSet;
use crate::error::{ProviderError, Result};
use crate::relations::Resolver;
use crate::schema::Schema;
use crate::session::Session;
use crate::state::Attrs;
use async_trait::async_trait;
use cfstack_api::CfClient;
use cfstack_config::ProviderConfig;
use std::sync::Arc;

/// Everything one operation may use
pub struct OpContext {
    pub session: Arc<Session>,
    pub resolver: Resolver,
}

impl OpContext {
    pub fn new(session: Arc<Session>) -> Self {
        let resolver = Resolver::new(&session.client);
        Self { session, resolver }
    }

    pub fn client(&self) -> &CfClient {
        &self.session.client
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.session.config
    }
}

/// One managed resource kind
///
/// `config` passed to `create` and `update` has defaults applied and every
/// relation already resolved to a guid.
#[async_trait]
pub trait Resource: Send + Sync {
    fn schema(&self) -> &Schema;

    /// Adjust the configuration before relations are resolved, e.g. by
    /// merging an application manifest.
    async fn prepare(&self, _ctx: &OpContext, config: Attrs) -> Result<Attrs> {
        Ok(config)
    }

    /// Create the entity and return its id.
    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String>;

    /// Observed attributes, or `None` when the entity is gone. `prior` is
    /// the recorded state, used for attributes the platform never reports.
    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>>;

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Attrs,
        config: &Attrs,
        changes: &ChangeSet,
    ) -> Result<()>;

    /// Apply an update and return the id the entity lives under afterwards.
    /// Kinds that can replace the entity during an update (an app rolled
    /// out blue-green) override this; the rest keep their id.
    async fn apply_update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Attrs,
        config: &Attrs,
        changes: &ChangeSet,
    ) -> Result<String> {
        self.update(ctx, id, prior, config, changes).await?;
        Ok(id.to_string())
    }

    async fn delete(&self, ctx: &OpContext, id: &str, state: &Attrs) -> Result<()>;

    /// Map an import key to the resource id.
    async fn import_id(&self, _ctx: &OpContext, import_id: &str) -> Result<String> {
        Ok(import_id.to_string())
    }
}

/// One data source
#[async_trait]
pub trait DataSource: Send + Sync {
    fn schema(&self) -> &Schema;

    /// Look the entity up and return its id and attributes.
    async fn read(&self, ctx: &OpContext, config: &Attrs) -> Result<(String, Attrs)>;
}

/// Split a composite import key like `org:user:role`.
pub fn split_key<'a>(id: &'a str, parts: usize, expected: &str) -> Result<Vec<&'a str>> {
    let split: Vec<&str> = id.split(':').collect();
    if split.len() != parts || split.iter().any(|p| p.is_empty()) {
        return Err(ProviderError::InvalidImportId {
            id: id.to_string(),
            expected: expected.to_string(),
        });
    }
    Ok(split)
}
