//! `cloudfoundry_isolation_segment` and
//! `cloudfoundry_isolation_segment_entitlement` (v3 only)

use super::{found, recorded_guids, set_delta};
use crate::diff::ChangeSet;
use crate::error::Result;
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

pub struct IsolationSegment {
    schema: Schema,
}

impl IsolationSegment {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_isolation_segment",
                vec![Attribute::string("name").required()],
            ),
        }
    }
}

fn guid_of(entity: &Value) -> String {
    entity
        .get("guid")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Resource for IsolationSegment {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let segments = ctx.client().isolation_segments();
        segments.require_supported()?;
        let created = segments
            .create(json!({ "name": config.str_attr("name").unwrap_or_default() }))
            .await?;
        Ok(guid_of(&created))
    }

    async fn read(&self, ctx: &OpContext, id: &str, _prior: &Attrs) -> Result<Option<Attrs>> {
        let segments = ctx.client().isolation_segments();
        segments.require_supported()?;
        let Some(entity) = found(segments.get(id).await)? else {
            return Ok(None);
        };
        let mut state = Attrs::new();
        state.insert("name".into(), entity.get("name").cloned().unwrap_or(Value::Null));
        Ok(Some(state))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Attrs,
        config: &Attrs,
        changes: &ChangeSet,
    ) -> Result<()> {
        if changes.has("name") {
            let segments = ctx.client().isolation_segments();
            segments.require_supported()?;
            segments
                .update(id, json!({ "name": config.str_attr("name").unwrap_or_default() }))
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Attrs) -> Result<()> {
        let segments = ctx.client().isolation_segments();
        segments.require_supported()?;
        segments.delete(id).await?;
        Ok(())
    }
}

/// Orgs entitled to one segment; the id is the segment guid.
pub struct Entitlement {
    schema: Schema,
}

impl Entitlement {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_isolation_segment_entitlement",
                vec![
                    Attribute::string("segment")
                        .required()
                        .force_new()
                        .unmapped()
                        .relation(RelationKind::IsolationSegment),
                    Attribute::set("orgs")
                        .required()
                        .unmapped()
                        .relation(RelationKind::Org),
                ],
            ),
        }
    }
}

#[async_trait]
impl Resource for Entitlement {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let segment = config.str_attr("segment").unwrap_or_default();
        ctx.client()
            .isolation_segments()
            .entitle_orgs(segment, &config.strings("orgs"))
            .await?;
        Ok(segment.to_string())
    }

    async fn read(&self, ctx: &OpContext, id: &str, _prior: &Attrs) -> Result<Option<Attrs>> {
        let Some(orgs) = found(ctx.client().isolation_segments().entitled_orgs(id).await)? else {
            return Ok(None);
        };
        let mut state = Attrs::new();
        state.insert("segment".into(), json!(id));
        state.insert("orgs".into(), json!(orgs));
        Ok(Some(state))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        _prior: &Attrs,
        config: &Attrs,
        _changes: &ChangeSet,
    ) -> Result<()> {
        let segments = ctx.client().isolation_segments();
        let current = segments.entitled_orgs(id).await?;
        let (add, remove) = set_delta(&current, &config.strings("orgs"));
        segments.entitle_orgs(id, &add).await?;
        for org in remove {
            segments.revoke_org(id, &org).await?;
        }
        Ok(())
    }

    /// Revoke only the orgs this entitlement granted.
    async fn delete(&self, ctx: &OpContext, id: &str, state: &Attrs) -> Result<()> {
        let segments = ctx.client().isolation_segments();
        for org in recorded_guids(ctx, state, "orgs", RelationKind::Org, None).await? {
            segments.revoke_org(id, &org).await?;
        }
        info!(segment = id, "entitlements revoked");
        Ok(())
    }
}
