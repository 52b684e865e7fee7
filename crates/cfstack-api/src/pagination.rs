//! Paged listings as lazy streams
//!
//! Pages are fetched only as the consumer pulls; dropping the stream (or
//! [`find_first`] matching) stops further requests.

use crate::client::{CfClient, Request};
use crate::error::Result;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// v2 resource metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub guid: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// v2 resource envelope: `{metadata, entity}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V2<E> {
    pub metadata: Metadata,
    pub entity: E,
}

impl<E> V2<E> {
    pub fn guid(&self) -> &str {
        &self.metadata.guid
    }
}

impl<E> Deref for V2<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.entity
    }
}

#[derive(Debug, Deserialize)]
struct V2Page<T> {
    #[serde(default)]
    next_url: Option<String>,
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct V3Link {
    href: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct V3Pagination {
    #[serde(default)]
    next: Option<V3Link>,
}

#[derive(Debug, Deserialize)]
struct V3Page<T> {
    #[serde(default)]
    pagination: V3Pagination,
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
}

/// v2 `q` filter: `q=name:foo;organization_guid:bar`
#[derive(Debug, Clone, Default)]
pub struct V2Query {
    filters: Vec<String>,
}

impl V2Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl AsRef<str>) -> Self {
        self.filters.push(format!("{}:{}", field, value.as_ref()));
        self
    }

    pub fn is_in(mut self, field: &str, values: &[String]) -> Self {
        self.filters.push(format!("{} IN {}", field, values.join(",")));
        self
    }

    pub fn apply(&self, request: Request) -> Request {
        if self.filters.is_empty() {
            request
        } else {
            request.query("q", self.filters.join(";"))
        }
    }
}

/// Stream every v2 resource returned by `request`, following `next_url`.
pub fn v2_stream<E>(client: &CfClient, request: Request) -> BoxStream<'static, Result<V2<E>>>
where
    E: DeserializeOwned + Send + 'static,
{
    let client = client.clone();
    stream::try_unfold(Some(request), move |next| {
        let client = client.clone();
        async move {
            let Some(request) = next else {
                return Ok::<_, crate::error::ApiError>(None);
            };
            let page: V2Page<V2<E>> = client.request_json(request).await?;
            let next = page.next_url.filter(|u| !u.is_empty()).map(Request::get);
            Ok(Some((page.resources, next)))
        }
    })
    .map_ok(|batch| stream::iter(batch.into_iter().map(Ok::<_, crate::error::ApiError>)))
    .try_flatten()
    .boxed()
}

/// Stream every v3 resource returned by `request`, following
/// `pagination.next.href`.
pub fn v3_stream<T>(client: &CfClient, request: Request) -> BoxStream<'static, Result<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let client = client.clone();
    stream::try_unfold(Some(request), move |next| {
        let client = client.clone();
        async move {
            let Some(request) = next else {
                return Ok::<_, crate::error::ApiError>(None);
            };
            let page: V3Page<T> = client.request_json(request).await?;
            let next = page
                .pagination
                .next
                .and_then(|l| l.href)
                .filter(|u| !u.is_empty())
                .map(Request::get);
            Ok(Some((page.resources, next)))
        }
    })
    .map_ok(|batch| stream::iter(batch.into_iter().map(Ok::<_, crate::error::ApiError>)))
    .try_flatten()
    .boxed()
}

/// First item matching `pred`; later pages are never requested.
pub async fn find_first<T, P>(mut items: BoxStream<'_, Result<T>>, mut pred: P) -> Result<Option<T>>
where
    P: FnMut(&T) -> bool,
{
    while let Some(item) = items.try_next().await? {
        if pred(&item) {
            return Ok(Some(item));
        }
    }
    Ok(None)
}

/// Drain the stream into a vector.
pub async fn collect_all<T>(items: BoxStream<'_, Result<T>>) -> Result<Vec<T>> {
    items.try_collect().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, client_for};
    use serde_json::{Value, json};

    fn org(guid: &str) -> Value {
        json!({"metadata": {"guid": guid, "url": format!("/v2/organizations/{}", guid)}, "entity": {"name": guid}})
    }

    #[tokio::test]
    async fn test_v2_pages_in_order() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            "/v2/organizations?page=2",
            200,
            json!({"next_url": null, "resources": [org("c")]}),
        );
        fake.respond(
            "GET",
            "/v2/organizations",
            200,
            json!({"next_url": "/v2/organizations?page=2", "resources": [org("a"), org("b")]}),
        );
        let client = client_for(&fake).await;

        let orgs: Vec<V2<Value>> =
            collect_all(v2_stream(&client, Request::get("/v2/organizations"))).await.unwrap();
        let guids: Vec<&str> = orgs.iter().map(|o| o.guid()).collect();
        assert_eq!(guids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_find_first_stops_early() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            "/v3/apps",
            200,
            json!({"pagination": {"next": {"href": "https://api.example.com/v3/apps?page=2"}}, "resources": [{"guid": "a1"}, {"guid": "a2"}]}),
        );
        let client = client_for(&fake).await;

        let found = find_first(v3_stream::<Value>(&client, Request::get("/v3/apps")), |a| {
            a["guid"] == "a2"
        })
        .await
        .unwrap();
        assert_eq!(found.unwrap()["guid"], "a2");
        assert_eq!(fake.count("GET", "/v3/apps"), 1);
    }

    #[test]
    fn test_v2_query() {
        let q = V2Query::new().eq("name", "acme").eq("organization_guid", "o1");
        assert_eq!(q.filters.join(";"), "name:acme;organization_guid:o1");
    }
}
