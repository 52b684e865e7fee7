use super::{V2Collection, collection_deref};
use crate::client::{CfClient, Request};
use crate::error::Result;
use crate::pagination::{self, V2Query};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

/// Space role edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaceRole {
    Developer,
    Manager,
    Auditor,
}

impl SpaceRole {
    pub const ALL: [SpaceRole; 3] = [SpaceRole::Developer, SpaceRole::Manager, SpaceRole::Auditor];

    pub fn relation(&self) -> &'static str {
        match self {
            SpaceRole::Developer => "developers",
            SpaceRole::Manager => "managers",
            SpaceRole::Auditor => "auditors",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceRole::Developer => "developer",
            SpaceRole::Manager => "manager",
            SpaceRole::Auditor => "auditor",
        }
    }
}

impl fmt::Display for SpaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpaceRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "developer" | "developers" => Ok(SpaceRole::Developer),
            "manager" | "managers" => Ok(SpaceRole::Manager),
            "auditor" | "auditors" => Ok(SpaceRole::Auditor),
            other => Err(format!("unknown space role {:?}", other)),
        }
    }
}

pub struct Spaces {
    collection: V2Collection,
}

collection_deref!(Spaces, V2Collection);

impl Spaces {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/spaces"),
        }
    }

    pub async fn associate_role(&self, space: &str, role: SpaceRole, user_guid: &str) -> Result<()> {
        self.associate(space, role.relation(), user_guid).await
    }

    pub async fn remove_role(&self, space: &str, role: SpaceRole, user_guid: &str) -> Result<()> {
        self.dissociate(space, role.relation(), user_guid).await
    }

    pub async fn role_members(&self, space: &str, role: SpaceRole) -> Result<Vec<String>> {
        self.related_guids(space, role.relation()).await
    }

    /// Guids of the security groups bound for running (`staging = false`) or
    /// staging apps.
    pub async fn security_groups(&self, space: &str, staging: bool) -> Result<Vec<String>> {
        let relation = if staging {
            "staging_security_groups"
        } else {
            "security_groups"
        };
        self.related_guids(space, relation).await
    }

    /// Isolation segment assigned to the space (v3 relationship).
    pub async fn isolation_segment(&self, space: &str) -> Result<Option<String>> {
        let path = format!("/v3/spaces/{}/relationships/isolation_segment", space);
        let body: Value = self.client().get_json(path).await?;
        Ok(body
            .pointer("/data/guid")
            .and_then(Value::as_str)
            .map(String::from))
    }

    pub async fn set_isolation_segment(&self, space: &str, segment: Option<&str>) -> Result<()> {
        let path = format!("/v3/spaces/{}/relationships/isolation_segment", space);
        let data = match segment {
            Some(guid) => json!({ "guid": guid }),
            None => Value::Null,
        };
        self.client()
            .send(Request::patch(path).json(json!({ "data": data })))
            .await?;
        Ok(())
    }
}

pub struct SecurityGroups {
    collection: V2Collection,
}

collection_deref!(SecurityGroups, V2Collection);

impl SecurityGroups {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/security_groups"),
        }
    }

    fn space_relation(staging: bool) -> &'static str {
        if staging { "staging_spaces" } else { "spaces" }
    }

    pub async fn bind_space(&self, group: &str, space: &str, staging: bool) -> Result<()> {
        self.associate(group, Self::space_relation(staging), space).await
    }

    pub async fn unbind_space(&self, group: &str, space: &str, staging: bool) -> Result<()> {
        self.dissociate(group, Self::space_relation(staging), space).await
    }

    fn defaults_path(staging: bool) -> &'static str {
        if staging {
            "/v2/config/staging_security_groups"
        } else {
            "/v2/config/running_security_groups"
        }
    }

    /// Platform-wide default groups for running or staging apps.
    pub async fn defaults(&self, staging: bool) -> Result<Vec<String>> {
        let groups = V2Collection::new(self.client(), Self::defaults_path(staging));
        let all = pagination::collect_all(groups.list(V2Query::new())).await?;
        Ok(all.into_iter().map(|g| g.metadata.guid).collect())
    }

    pub async fn bind_default(&self, group: &str, staging: bool) -> Result<()> {
        let path = format!("{}/{}", Self::defaults_path(staging), group);
        self.client().send(Request::put(path)).await?;
        Ok(())
    }

    pub async fn unbind_default(&self, group: &str, staging: bool) -> Result<()> {
        let path = format!("{}/{}", Self::defaults_path(staging), group);
        match self.client().send(Request::delete(path)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, client_for};

    #[tokio::test]
    async fn test_staging_binding_path() {
        let fake = FakePlatform::with_defaults();
        fake.respond("PUT", "/v2/security_groups/sg1/staging_spaces/s1", 201, json!({}));
        let client = client_for(&fake).await;

        client.security_groups().bind_space("sg1", "s1", true).await.unwrap();
        assert_eq!(fake.count("PUT", "/v2/security_groups/sg1/staging_spaces/s1"), 1);
    }

    #[tokio::test]
    async fn test_default_groups() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            "/v2/config/running_security_groups",
            200,
            json!({"resources": [{"metadata": {"guid": "sg1"}, "entity": {"name": "public"}}]}),
        );
        fake.respond("PUT", "/v2/config/staging_security_groups/sg2", 200, json!({}));
        let client = client_for(&fake).await;
        let groups = client.security_groups();

        assert_eq!(groups.defaults(false).await.unwrap(), vec!["sg1"]);
        groups.bind_default("sg2", true).await.unwrap();
        groups.unbind_default("sg3", false).await.unwrap();
        assert_eq!(fake.count("PUT", "/v2/config/staging_security_groups/sg2"), 1);
        assert_eq!(fake.count("DELETE", "/v2/config/running_security_groups/sg3"), 1);
    }

    #[tokio::test]
    async fn test_isolation_segment_relationship() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            "/v3/spaces/s1/relationships/isolation_segment",
            200,
            json!({"data": {"guid": "iso-1"}}),
        );
        fake.respond("PATCH", "/v3/spaces/s1/relationships/isolation_segment", 200, json!({}));
        let client = client_for(&fake).await;

        assert_eq!(
            client.spaces().isolation_segment("s1").await.unwrap().as_deref(),
            Some("iso-1")
        );
        client.spaces().set_isolation_segment("s1", None).await.unwrap();
        let Some(crate::http::Body::Json(body)) = fake.last_request().map(|r| r.body) else {
            panic!("expected JSON body");
        };
        assert_eq!(body, json!({"data": null}));
    }
}
