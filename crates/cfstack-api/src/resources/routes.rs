use super::{V2Collection, collection_deref};
use crate::client::{CfClient, Request};
use crate::error::Result;
use crate::pagination::V2Query;
use serde_json::{Value, json};

pub struct Routes {
    collection: V2Collection,
}

collection_deref!(Routes, V2Collection);

impl Routes {
    pub fn new(client: &CfClient) -> Self {
        Self {
            collection: V2Collection::new(client, "/v2/routes"),
        }
    }

    /// Route with exactly this domain, host, path and port.
    pub async fn find(
        &self,
        domain: &str,
        host: &str,
        path: &str,
        port: Option<i64>,
    ) -> Result<Option<crate::pagination::V2<Value>>> {
        let mut query = V2Query::new().eq("domain_guid", domain).eq("host", host);
        if !path.is_empty() {
            query = query.eq("path", path);
        }
        if let Some(port) = port {
            query = query.eq("port", port.to_string());
        }
        crate::pagination::find_first(self.list(query), |r| {
            r.str_field("host").unwrap_or_default() == host
                && r.str_field("path").unwrap_or_default() == path
                && (port.is_none() || r.entity.get("port").and_then(Value::as_i64) == port)
        })
        .await
    }

    /// Apps currently mapped to the route.
    pub async fn app_guids(&self, route: &str) -> Result<Vec<String>> {
        self.related_guids(route, "apps").await
    }

    /// Bind a route service instance to the route.
    pub async fn bind_route_service(
        &self,
        route: &str,
        service_instance: &str,
        params: Option<Value>,
    ) -> Result<()> {
        let mut body = json!({ "service_instance_guid": service_instance });
        if let Some(params) = params {
            body["parameters"] = params;
        }
        let path = format!("{}/route_service", self.item_path(route));
        self.client().send(Request::put(path).json(body)).await?;
        Ok(())
    }

    pub async fn unbind_route_service(&self, route: &str) -> Result<()> {
        let path = format!("{}/route_service", self.item_path(route));
        match self.client().send(Request::delete(path)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Service instance bound as route service, if any.
    pub async fn route_service(&self, route: &str) -> Result<Option<String>> {
        let entity = self.get(route).await?;
        Ok(entity
            .str_field("service_instance_guid")
            .filter(|g| !g.is_empty())
            .map(String::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, client_for};

    #[tokio::test]
    async fn test_route_service_binding() {
        let fake = FakePlatform::with_defaults();
        fake.respond("PUT", "/v2/routes/r1/route_service", 201, json!({}));
        fake.respond(
            "GET",
            "/v2/routes/r1",
            200,
            json!({"metadata": {"guid": "r1"}, "entity": {"host": "www", "service_instance_guid": "si1"}}),
        );
        let client = client_for(&fake).await;

        client
            .routes()
            .bind_route_service("r1", "si1", Some(json!({"mode": "strict"})))
            .await
            .unwrap();
        let Some(crate::http::Body::Json(body)) = fake.last_request().map(|r| r.body) else {
            panic!("expected JSON body");
        };
        assert_eq!(body["service_instance_guid"], "si1");
        assert_eq!(body["parameters"]["mode"], "strict");

        assert_eq!(client.routes().route_service("r1").await.unwrap().as_deref(), Some("si1"));
    }

    #[tokio::test]
    async fn test_find_route_filters() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            "/v2/routes",
            200,
            json!({"resources": [{"metadata": {"guid": "r1"}, "entity": {"host": "www", "path": ""}}]}),
        );
        let client = client_for(&fake).await;

        let found = client.routes().find("d1", "www", "", None).await.unwrap();
        assert_eq!(found.unwrap().guid(), "r1");
        assert_eq!(fake.count("GET", "/v2/routes?q=domain_guid:d1;host:www"), 1);
    }
}
