use super::{V2Collection, collection_deref};
use crate::client::{CfClient, Request};
use crate::error::Result;
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

/// Organization role edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrgRole {
    User,
    Manager,
    BillingManager,
    Auditor,
}

impl OrgRole {
    pub const ALL: [OrgRole; 4] = [
        OrgRole::User,
        OrgRole::Manager,
        OrgRole::BillingManager,
        OrgRole::Auditor,
    ];

    /// v2 relation path segment
    pub fn relation(&self) -> &'static str {
        match self {
            OrgRole::User => "users",
            OrgRole::Manager => "managers",
            OrgRole::BillingManager => "billing_managers",
            OrgRole::Auditor => "auditors",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::User => "user",
            OrgRole::Manager => "manager",
            OrgRole::BillingManager => "billing_manager",
            OrgRole::Auditor => "auditor",
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "user" | "users" => Ok(OrgRole::User),
            "manager" | "managers" => Ok(OrgRole::Manager),
            "billing_manager" | "billing_managers" => Ok(OrgRole::BillingManager),
            "auditor" | "auditors" => Ok(OrgRole::Auditor),
            other => Err(format!("unknown organization role {:?}", other)),
        }
    }
}

pub struct Organizations {
    collection: V2Collection,
}

collection_deref!(Organizations, V2Collection);

impl Organizations {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/organizations"),
        }
    }

    /// Grant `role` to `user_guid`. Every role other than `User` also
    /// requires org membership, which is granted first.
    pub async fn associate_role(&self, org: &str, role: OrgRole, user_guid: &str) -> Result<()> {
        if role != OrgRole::User {
            self.associate(org, OrgRole::User.relation(), user_guid).await?;
        }
        self.associate(org, role.relation(), user_guid).await
    }

    /// Grant `role` by username, for users the platform knows only by name.
    pub async fn associate_role_by_username(
        &self,
        org: &str,
        role: OrgRole,
        username: &str,
    ) -> Result<Value> {
        let path = format!("{}/{}", self.item_path(org), role.relation());
        self.client()
            .request_json(Request::put(path).json(json!({ "username": username })))
            .await
    }

    pub async fn remove_role(&self, org: &str, role: OrgRole, user_guid: &str) -> Result<()> {
        self.dissociate(org, role.relation(), user_guid).await
    }

    /// Guids of every user holding `role`.
    pub async fn role_members(&self, org: &str, role: OrgRole) -> Result<Vec<String>> {
        self.related_guids(org, role.relation()).await
    }

    /// Default isolation segment (v3 relationship).
    pub async fn default_isolation_segment(&self, org: &str) -> Result<Option<String>> {
        let path = format!("/v3/organizations/{}/relationships/default_isolation_segment", org);
        let body: Value = self.client().get_json(path).await?;
        Ok(body
            .pointer("/data/guid")
            .and_then(Value::as_str)
            .map(String::from))
    }

    pub async fn set_default_isolation_segment(
        &self,
        org: &str,
        segment: Option<&str>,
    ) -> Result<()> {
        let path = format!("/v3/organizations/{}/relationships/default_isolation_segment", org);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, client_for};

    #[test]
    fn test_role_names() {
        for role in OrgRole::ALL {
            assert_eq!(role.as_str().parse::<OrgRole>().unwrap(), role);
            assert_eq!(role.relation().parse::<OrgRole>().unwrap(), role);
        }
        assert!("owner".parse::<OrgRole>().is_err());
    }

    #[tokio::test]
    async fn test_manager_role_adds_membership_first() {
        let fake = FakePlatform::with_defaults();
        fake.respond("PUT", "/v2/organizations/o1/users/u1", 201, json!({}));
        fake.respond("PUT", "/v2/organizations/o1/managers/u1", 201, json!({}));
        let client = client_for(&fake).await;

        client
            .organizations()
            .associate_role("o1", OrgRole::Manager, "u1")
            .await
            .unwrap();

        let urls: Vec<String> = fake.mutating_requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://api.example.com/v2/organizations/o1/users/u1",
                "https://api.example.com/v2/organizations/o1/managers/u1",
            ]
        );
    }
}
