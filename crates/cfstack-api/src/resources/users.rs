//! Users: SCIM records in the identity service mirrored into the platform

use super::{DeleteOptions, V2Collection, collection_deref};
use crate::catalog::Endpoint;
use crate::client::{AuthScope, CfClient, Request};
use crate::error::Result;
use serde_json::{Value, json};

pub struct Users {
    collection: V2Collection,
}

collection_deref!(Users, V2Collection);

fn uaa(request: Request) -> Request {
    request.on(Endpoint::Uaa).auth(AuthScope::UaaAdmin)
}

fn first_resource(body: Value) -> Option<Value> {
    body.get("resources")?.as_array()?.first().cloned()
}

impl Users {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/users"),
        }
    }

    /// Create the SCIM user; returns the SCIM resource with its `id`.
    pub async fn create_scim(&self, body: Value) -> Result<Value> {
        self.client().request_json(uaa(Request::post("/Users").json(body))).await
    }

    pub async fn get_scim(&self, id: &str) -> Result<Value> {
        self.client()
            .request_json(uaa(Request::get(format!("/Users/{}", id))))
            .await
    }

    pub async fn find_scim(&self, username: &str, origin: Option<&str>) -> Result<Option<Value>> {
        let mut filter = format!("userName eq \"{}\"", username);
        if let Some(origin) = origin {
            filter.push_str(&format!(" and origin eq \"{}\"", origin));
        }
        let body: Value = self
            .client()
            .request_json(uaa(Request::get("/Users").query("filter", filter)))
            .await?;
        Ok(first_resource(body))
    }

    /// Replace the SCIM record; `version` is the record's `meta.version`.
    pub async fn update_scim(&self, id: &str, version: i64, body: Value) -> Result<Value> {
        self.client()
            .request_json(uaa(
                Request::put(format!("/Users/{}", id))
                    .header("If-Match", version.to_string())
                    .json(body),
            ))
            .await
    }

    pub async fn change_password(&self, id: &str, old: Option<&str>, new: &str) -> Result<()> {
        let mut body = json!({ "password": new });
        if let Some(old) = old {
            body["oldPassword"] = json!(old);
        }
        self.client()
            .send(uaa(Request::put(format!("/Users/{}/password", id)).json(body)))
            .await?;
        Ok(())
    }

    pub async fn delete_scim(&self, id: &str) -> Result<()> {
        match self
            .client()
            .send(uaa(Request::delete(format!("/Users/{}", id))))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn group_id(&self, display_name: &str) -> Result<Option<String>> {
        let body: Value = self
            .client()
            .request_json(uaa(
                Request::get("/Groups").query("filter", format!("displayName eq \"{}\"", display_name)),
            ))
            .await?;
        Ok(first_resource(body)
            .and_then(|g| g.get("id").and_then(Value::as_str).map(String::from)))
    }

    pub async fn add_to_group(&self, group_id: &str, user_id: &str, origin: &str) -> Result<()> {
        self.client()
            .send(uaa(Request::post(format!("/Groups/{}/members", group_id)).json(json!({
                "origin": origin,
                "type": "USER",
                "value": user_id,
            }))))
            .await?;
        Ok(())
    }

    pub async fn remove_from_group(&self, group_id: &str, user_id: &str) -> Result<()> {
        match self
            .client()
            .send(uaa(Request::delete(format!(
                "/Groups/{}/members/{}",
                group_id, user_id
            ))))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Register the SCIM user with the cloud controller under the same guid.
    pub async fn register(&self, guid: &str) -> Result<()> {
        self.create(json!({ "guid": guid })).await?;
        Ok(())
    }

    pub async fn unregister(&self, guid: &str) -> Result<()> {
        self.delete(guid, DeleteOptions::background()).await
    }
}
