//! Lookups of one v2 entity by name, optionally within a parent

use crate::error::{ProviderError, Result};
use crate::mapper::to_state;
use crate::resource::{DataSource, OpContext};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use cfstack_api::V2Query;
use cfstack_api::resources::V2Collection;

/// Parent the name is unique within, e.g. the org of a space
#[derive(Clone, Copy)]
pub struct Scope {
    pub attribute: &'static str,
    pub filter: &'static str,
    pub kind: RelationKind,
}

pub struct ByName {
    schema: Schema,
    path: &'static str,
    scope: Option<Scope>,
}

impl ByName {
    pub fn new(type_name: &'static str, path: &'static str, computed: Vec<Attribute>) -> Self {
        let mut attributes = vec![Attribute::string("name").required()];
        attributes.extend(computed.into_iter().map(Attribute::computed));
        Self {
            schema: Schema::new(type_name, attributes),
            path,
            scope: None,
        }
    }

    pub fn within(mut self, scope: Scope) -> Self {
        self.schema.attributes.insert(
            1,
            Attribute::string(scope.attribute)
                .required()
                .unmapped()
                .relation(scope.kind),
        );
        self.scope = Some(scope);
        self
    }
}

#[async_trait]
impl DataSource for ByName {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, ctx: &OpContext, config: &Attrs) -> Result<(String, Attrs)> {
        let name = config.str_attr("name").unwrap_or_default();
        let mut query = V2Query::new();
        if let Some(scope) = self.scope {
            let parent = config.str_attr(scope.attribute).unwrap_or_default();
            let guid = ctx
                .resolver
                .resolve(scope.attribute, scope.kind, parent, None)
                .await?;
            query = query.eq(scope.filter, guid);
        }
        let entity = V2Collection::new(ctx.client(), self.path)
            .find_by_name(name, query)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} {:?}", self.schema.type_name, name)))?;
        let attrs = to_state(&self.schema, &entity.entity, &Attrs::new());
        Ok((entity.metadata.guid, attrs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_schema() {
        let source = ByName::new(
            "cloudfoundry_space",
            "/v2/spaces",
            vec![Attribute::bool("allow_ssh")],
        )
        .within(Scope {
            attribute: "org",
            filter: "organization_guid",
            kind: RelationKind::Org,
        });
        let names: Vec<&str> = source.schema.attributes.iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["name", "org", "allow_ssh"]);
        assert!(source.schema.attribute("allow_ssh").unwrap().is_computed_only());
    }
}
