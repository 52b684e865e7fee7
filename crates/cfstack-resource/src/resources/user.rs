//! `cloudfoundry_user`
//!
//! The identity-service (SCIM) user and the cloud controller user share
//! one guid. Group membership is only managed for configured groups.

use super::{found, set_delta};
use crate::diff::ChangeSet;
use crate::error::{ProviderError, Result};
use crate::mapper::get_path;
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

const DEFAULT_ORIGIN: &str = "uaa";

pub struct User {
    schema: Schema,
}

impl User {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(
                "cloudfoundry_user",
                vec![
                    Attribute::string("name").required().unmapped(),
                    Attribute::string("password").sensitive().local(),
                    Attribute::string("origin")
                        .force_new()
                        .unmapped()
                        .default(json!(DEFAULT_ORIGIN)),
                    Attribute::string("given_name").unmapped().optional_computed(),
                    Attribute::string("family_name").unmapped().optional_computed(),
                    Attribute::string("email").unmapped().optional_computed(),
                    Attribute::set("groups").unmapped(),
                ],
            ),
        }
    }

    async fn sync_groups(&self, ctx: &OpContext, user: &str, current: &[String], config: &Attrs) -> Result<()> {
        let users = ctx.client().users();
        let origin = config.str_attr("origin").unwrap_or(DEFAULT_ORIGIN);
        let (add, remove) = set_delta(current, &config.strings("groups"));
        for name in add {
            let group = group_id(ctx, &name).await?;
            users.add_to_group(&group, user, origin).await?;
        }
        for name in remove {
            match users.group_id(&name).await? {
                Some(group) => users.remove_from_group(&group, user).await?,
                None => warn!(group = %name, "group already gone"),
            }
        }
        Ok(())
    }
}

async fn group_id(ctx: &OpContext, name: &str) -> Result<String> {
    ctx.client()
        .users()
        .group_id(name)
        .await?
        .ok_or_else(|| ProviderError::InvalidRelation {
            attribute: "groups".into(),
            value: name.to_string(),
            message: "no group with that name".into(),
        })
}

/// SCIM representation of the configured user.
fn scim_body(config: &Attrs) -> Value {
    let mut body = json!({
        "userName": config.str_attr("name").unwrap_or_default(),
        "origin": config.str_attr("origin").unwrap_or(DEFAULT_ORIGIN),
        "name": {
            "givenName": config.str_attr("given_name").unwrap_or_default(),
            "familyName": config.str_attr("family_name").unwrap_or_default(),
        },
    });
    let email = config
        .str_attr("email")
        .or_else(|| config.str_attr("name").filter(|n| n.contains('@')));
    if let Some(email) = email {
        body["emails"] = json!([{ "value": email, "primary": true }]);
    }
    body
}

fn group_names(scim: &Value) -> Vec<String> {
    scim.get("groups")
        .and_then(Value::as_array)
        .map(|groups| {
            groups
                .iter()
                .filter_map(|g| g.get("display").and_then(Value::as_str).map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Resource for User {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let users = ctx.client().users();
        let mut body = scim_body(config);
        if let Some(password) = config.str_attr("password") {
            body["password"] = json!(password);
        }
        let created = users.create_scim(body).await?;
        let id = created
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        users.register(&id).await?;
        self.sync_groups(ctx, &id, &[], config).await?;
        info!(user = %id, "user created");
        Ok(id)
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let Some(scim) = found(ctx.client().users().get_scim(id).await)? else {
            return Ok(None);
        };
        let text = |path: &str| get_path(&scim, path).cloned().unwrap_or(Value::Null);
        let mut state = Attrs::new();
        state.insert("name".into(), text("userName"));
        state.insert("origin".into(), text("origin"));
        state.insert("given_name".into(), text("name.givenName"));
        state.insert("family_name".into(), text("name.familyName"));
        let email = scim
            .get("emails")
            .and_then(Value::as_array)
            .and_then(|emails| emails.first())
            .and_then(|e| e.get("value"))
            .cloned()
            .unwrap_or(Value::Null);
        state.insert("email".into(), email);
        if let Some(password) = prior.get("password") {
            state.insert("password".into(), password.clone());
        }

        // Default groups every user holds are not reported.
        let configured = prior.strings("groups");
        let groups: Vec<String> = group_names(&scim)
            .into_iter()
            .filter(|g| configured.contains(g))
            .collect();
        state.insert("groups".into(), json!(groups));
        Ok(Some(state))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Attrs,
        config: &Attrs,
        changes: &ChangeSet,
    ) -> Result<()> {
        let users = ctx.client().users();
        if changes.any(&["name", "given_name", "family_name", "email"]) {
            let current = users.get_scim(id).await?;
            let version = get_path(&current, "meta.version")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            users.update_scim(id, version, scim_body(config)).await?;
        }
        if changes.has("password")
            && let Some(password) = config.str_attr("password")
        {
            users
                .change_password(id, prior.str_attr("password"), password)
                .await?;
        }
        if changes.has("groups") {
            self.sync_groups(ctx, id, &prior.strings("groups"), config)
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, id: &str, _state: &Attrs) -> Result<()> {
        let users = ctx.client().users();
        users.unregister(id).await?;
        users.delete_scim(id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::attrs;

    #[test]
    fn test_scim_body_uses_username_as_email() {
        let body = scim_body(&attrs(json!({"name": "jane@example.com"})));
        assert_eq!(body["userName"], "jane@example.com");
        assert_eq!(body["origin"], "uaa");
        assert_eq!(body["emails"][0]["value"], "jane@example.com");

        let plain = scim_body(&attrs(json!({"name": "jane"})));
        assert!(plain.get("emails").is_none());
    }
}
