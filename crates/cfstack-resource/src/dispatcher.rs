//! Host operations over the registered kinds
//!
//! Every entry point follows the same order: validate, prepare, resolve
//! relations, call the kind, read back.

use crate::data_sources;
use crate::diff::{ChangeSet, PlanResult, diff};
use crate::error::{ProviderError, Result};
use crate::resource::{DataSource, OpContext, Resource};
use crate::resources;
use crate::session::Session;
use crate::state::{Attrs, ResourceData};
use cfstack_api::warnings;
use cfstack_config::ProviderConfig;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Registry of kinds plus the configured session
pub struct Provider {
    resources: BTreeMap<&'static str, Arc<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Arc<dyn DataSource>>,
    session: RwLock<Option<Arc<Session>>>,
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider {
    pub fn new() -> Self {
        let resources = resources::all()
            .into_iter()
            .map(|r| (r.schema().type_name, r))
            .collect();
        let data_sources = data_sources::all()
            .into_iter()
            .map(|d| (d.schema().type_name, d))
            .collect();
        Self {
            resources,
            data_sources,
            session: RwLock::new(None),
        }
    }

    /// Provider bound to an existing session.
    pub fn with_session(session: Session) -> Self {
        let provider = Self::new();
        provider.set_session(session);
        provider
    }

    pub fn set_session(&self, session: Session) {
        if let Ok(mut slot) = self.session.write() {
            *slot = Some(Arc::new(session));
        }
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session
            .read()
            .ok()
            .and_then(|s| s.clone())
            .ok_or(ProviderError::NotConfigured)
    }

    fn context(&self) -> Result<OpContext> {
        Ok(OpContext::new(self.session()?))
    }

    fn resource(&self, type_name: &str) -> Result<Arc<dyn Resource>> {
        self.resources
            .get(type_name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResourceType(type_name.to_string()))
    }

    fn data_source(&self, type_name: &str) -> Result<Arc<dyn DataSource>> {
        self.data_sources
            .get(type_name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResourceType(type_name.to_string()))
    }

    /// Every resource and data source schema.
    pub fn schemas(&self) -> Value {
        let resources: BTreeMap<&str, Value> = self
            .resources
            .iter()
            .map(|(name, r)| (*name, r.schema().to_json()))
            .collect();
        let data_sources: BTreeMap<&str, Value> = self
            .data_sources
            .iter()
            .map(|(name, d)| (*name, d.schema().to_json()))
            .collect();
        json!({ "resources": resources, "data_sources": data_sources })
    }

    /// Build the session from the host's provider block.
    #[instrument(skip_all)]
    pub async fn configure(&self, config: &Value) -> Result<()> {
        let config = ProviderConfig::from_value(config)?;
        let session = Session::connect(config).await?;
        self.set_session(session);
        info!("provider configured");
        Ok(())
    }

    pub fn validate_resource_config(&self, type_name: &str, config: &Attrs) -> Result<()> {
        if let Some(resource) = self.resources.get(type_name) {
            return resource.schema().validate(config);
        }
        self.data_source(type_name)?.schema().validate(config)
    }

    /// Resolve relations, then read back.
    async fn read_back(
        &self,
        ctx: &OpContext,
        resource: &dyn Resource,
        id: &str,
        prior: &Attrs,
    ) -> Result<Option<ResourceData>> {
        let observed = match resource.read(ctx, id, prior).await {
            Ok(Some(observed)) => observed,
            Ok(None) => return Ok(None),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let schema = resource.schema();
        let mut observed = schema.normalized(&observed);
        ctx.resolver.keep_references(schema, prior, &mut observed).await;
        Ok(Some(ResourceData::new(id, observed)))
    }

    /// Configuration ready for the kind: prepared and defaulted.
    async fn desired(&self, ctx: &OpContext, resource: &dyn Resource, config: &Attrs) -> Result<Attrs> {
        let schema = resource.schema();
        schema.validate(config)?;
        let prepared = resource.prepare(ctx, config.clone()).await?;
        Ok(schema.with_defaults(&prepared))
    }

    /// Let configured references that point at the same entity as the
    /// recorded ones compare equal.
    async fn align_references(
        &self,
        ctx: &OpContext,
        resource: &dyn Resource,
        recorded: &Attrs,
        config: &mut Attrs,
    ) -> Result<()> {
        let schema = resource.schema();
        let differing: Vec<&str> = schema
            .attributes
            .iter()
            .filter(|a| a.relation.is_some())
            .filter(|a| {
                let wanted = config.get(a.name);
                wanted.is_some() && wanted != recorded.get(a.name)
            })
            .map(|a| a.name)
            .collect();
        if differing.is_empty() {
            return Ok(());
        }
        let Ok(recorded_guids) = ctx.resolver.resolve_config(schema, recorded).await else {
            return Ok(());
        };
        let config_guids = ctx.resolver.resolve_config(schema, config).await?;
        for name in differing {
            if recorded_guids.get(name) == config_guids.get(name)
                && let Some(value) = recorded.get(name)
            {
                config.insert(name.to_string(), value.clone());
            }
        }
        Ok(())
    }

    #[instrument(skip(self, config))]
    pub async fn create(&self, type_name: &str, config: &Attrs) -> Result<ResourceData> {
        let resource = self.resource(type_name)?;
        let ctx = self.context()?;
        let desired = self.desired(&ctx, resource.as_ref(), config).await?;
        let resolved = ctx.resolver.resolve_config(resource.schema(), &desired).await?;

        let id = resource.create(&ctx, &resolved).await?;
        info!(type_name, id = %id, "created");
        self.read_back(&ctx, resource.as_ref(), &id, &desired)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} {} after create", type_name, id)))
    }

    #[instrument(skip(self, state))]
    pub async fn read(&self, type_name: &str, id: &str, state: &Attrs) -> Result<Option<ResourceData>> {
        let resource = self.resource(type_name)?;
        let ctx = self.context()?;
        let data = self.read_back(&ctx, resource.as_ref(), id, state).await?;
        if data.is_none() {
            info!(type_name, id, "gone");
        }
        Ok(data)
    }

    #[instrument(skip(self, state, config))]
    pub async fn update(
        &self,
        type_name: &str,
        id: &str,
        state: &Attrs,
        config: &Attrs,
    ) -> Result<ResourceData> {
        let resource = self.resource(type_name)?;
        let ctx = self.context()?;
        let mut desired = self.desired(&ctx, resource.as_ref(), config).await?;
        self.align_references(&ctx, resource.as_ref(), state, &mut desired)
            .await?;

        let changes = diff(resource.schema(), state, &desired);
        if changes.requires_replace() {
            return Err(ProviderError::RequiresReplace(changes.replace));
        }
        let mut id = id.to_string();
        if changes.is_empty() {
            debug!(type_name, id = %id, "no changes");
        } else {
            let resolved = ctx.resolver.resolve_config(resource.schema(), &desired).await?;
            let new_id = resource
                .apply_update(&ctx, &id, state, &resolved, &changes)
                .await?;
            if new_id != id {
                info!(type_name, old_id = %id, id = %new_id, "replaced during update");
                id = new_id;
            }
            info!(type_name, id = %id, changed = ?changes.changed, "updated");
        }
        self.read_back(&ctx, resource.as_ref(), &id, &desired)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} {}", type_name, id)))
    }

    #[instrument(skip(self, state))]
    pub async fn delete(&self, type_name: &str, id: &str, state: &Attrs) -> Result<()> {
        let resource = self.resource(type_name)?;
        let ctx = self.context()?;
        match resource.delete(&ctx, id, state).await {
            Err(e) if e.is_not_found() => {
                debug!(type_name, id, "already gone");
                Ok(())
            }
            other => {
                if other.is_ok() {
                    info!(type_name, id, "deleted");
                }
                other
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn import(&self, type_name: &str, import_id: &str) -> Result<ResourceData> {
        let resource = self.resource(type_name)?;
        let ctx = self.context()?;
        let id = resource.import_id(&ctx, import_id).await?;
        self.read_back(&ctx, resource.as_ref(), &id, &Attrs::new())
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} {}", type_name, import_id)))
    }

    #[instrument(skip(self, state))]
    pub async fn exists(&self, type_name: &str, id: &str, state: &Attrs) -> Result<bool> {
        Ok(self.read(type_name, id, state).await?.is_some())
    }

    /// Compare the configuration with what the platform reports now.
    #[instrument(skip(self, state, config))]
    pub async fn plan(
        &self,
        type_name: &str,
        id: Option<&str>,
        state: &Attrs,
        config: &Attrs,
    ) -> Result<PlanResult> {
        let resource = self.resource(type_name)?;
        let ctx = self.context()?;
        let mut desired = self.desired(&ctx, resource.as_ref(), config).await?;
        let Some(id) = id.filter(|id| !id.is_empty()) else {
            return Ok(PlanResult::create());
        };
        let Some(observed) = self.read_back(&ctx, resource.as_ref(), id, state).await? else {
            return Ok(PlanResult::create());
        };
        self.align_references(&ctx, resource.as_ref(), &observed.attrs, &mut desired)
            .await?;
        let changes: ChangeSet = diff(resource.schema(), &observed.attrs, &desired);
        if !changes.is_empty() {
            info!(type_name, id, action = %changes.action(), attributes = ?changes.changed, "drift detected");
        }
        Ok(PlanResult::from(&changes))
    }

    #[instrument(skip(self, config))]
    pub async fn read_data_source(&self, type_name: &str, config: &Attrs) -> Result<ResourceData> {
        let source = self.data_source(type_name)?;
        source.schema().validate(config)?;
        let ctx = self.context()?;
        let (id, attrs) = source.read(&ctx, config).await?;
        let mut attrs = source.schema().normalized(&attrs);
        for (key, value) in config {
            attrs.insert(key.clone(), value.clone());
        }
        Ok(ResourceData::new(id, attrs))
    }
}

/// Run `operation` under the host's deadline and cancellation signal,
/// collecting the platform warnings it produces.
///
/// On cancel or timeout the operation future is dropped at its next
/// suspension point.
pub async fn run<T, F>(
    operation: F,
    timeout: Option<Duration>,
    mut cancel: watch::Receiver<bool>,
) -> (Result<T>, Vec<String>)
where
    F: Future<Output = Result<T>>,
{
    let guarded = async move {
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            loop {
                if *cancel.borrow_and_update() {
                    return;
                }
                if cancel.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            result = operation => result,
            _ = cancelled => {
                warn!("operation cancelled");
                Err(ProviderError::Cancelled)
            }
            _ = deadline => Err(ProviderError::Timeout(timeout.unwrap_or_default())),
        }
    };
    warnings::collect(guarded).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let (_tx, rx) = watch::channel(false);
        let (result, _) = run(
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            Some(Duration::from_secs(1)),
            rx,
        )
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            std::future::pending::<Result<()>>(),
            None,
            rx,
        ));
        tx.send(true).unwrap();
        let (result, _) = handle.await.unwrap();
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_collects_warnings() {
        let (_tx, rx) = watch::channel(false);
        let (result, warnings) = run(
            async {
                cfstack_api::warnings::push("deprecated field");
                Ok(7)
            },
            None,
            rx,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(warnings, vec!["deprecated field"]);
    }

    #[test]
    fn test_every_kind_registered() {
        let provider = Provider::new();
        assert_eq!(provider.resources.len(), 25);
        assert_eq!(provider.data_sources.len(), 17);
        assert!(matches!(
            provider.resource("cloudfoundry_nope"),
            Err(ProviderError::UnknownResourceType(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured() {
        let provider = Provider::new();
        let err = provider
            .read("cloudfoundry_org", "x", &Attrs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured));
    }
}
