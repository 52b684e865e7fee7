//! Authenticated request execution
//!
//! [`CfClient`] resolves a [`Request`] against the endpoint catalog, attaches
//! a bearer token, and applies the transport rules: backoff on throttling and
//! connection failures, a single refresh-and-retransmit on 401, and decoding
//! of every other non-2xx status into a [`PlatformError`].

use crate::auth::{Grant, TokenManager};
use crate::catalog::{Endpoint, EndpointCatalog};
use crate::error::{ApiError, PlatformError, Result};
use crate::http::{Body, HttpSend, Method, RawRequest, RawResponse, Upload};
use crate::job::PollConfig;
use crate::retry::{RetryPolicy, is_retryable_status};
use crate::warnings;
use cfstack_config::ProviderConfig;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Which token, if any, authorizes a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScope {
    #[default]
    CloudController,
    /// Identity-service administration; falls back to the main token when
    /// no dedicated client is configured.
    UaaAdmin,
    None,
}

/// A request before URL resolution and authentication
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    endpoint: Endpoint,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Body,
    auth: AuthScope,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: Endpoint::CloudController,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Body::Empty,
            auth: AuthScope::CloudController,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Resolve `path` against another advertised endpoint.
    pub fn on(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn query_opt(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = Body::Form(pairs);
        self
    }

    pub fn upload(mut self, upload: Upload) -> Self {
        self.body = Body::Upload(upload);
        self
    }

    pub fn auth(mut self, scope: AuthScope) -> Self {
        self.auth = scope;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }
}

/// Timing knobs for transport retries and job polling
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub retry: RetryPolicy,
    pub poll: PollConfig,
}

struct Inner {
    http: Arc<dyn HttpSend>,
    catalog: EndpointCatalog,
    auth: TokenManager,
    uaa_admin: Option<TokenManager>,
    options: ClientOptions,
}

/// Cheaply cloneable handle shared by every resource client
#[derive(Clone)]
pub struct CfClient {
    inner: Arc<Inner>,
}

impl CfClient {
    pub fn new(
        http: Arc<dyn HttpSend>,
        catalog: EndpointCatalog,
        auth: TokenManager,
        uaa_admin: Option<TokenManager>,
        options: ClientOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                catalog,
                auth,
                uaa_admin,
                options,
            }),
        }
    }

    /// Discover endpoints, then authenticate with the configured grant.
    pub async fn connect(config: &ProviderConfig, http: Arc<dyn HttpSend>) -> Result<Self> {
        let catalog = fetch_catalog(http.as_ref(), &config.api_url).await?;
        let auth_base = catalog.auth_base()?.to_string();

        let auth = TokenManager::new(
            Arc::clone(&http),
            &auth_base,
            config.oauth_client(),
            Grant::from(config.credentials()?),
        )
        .with_store(config.store_tokens_path.clone());
        auth.authenticate().await?;

        let uaa_admin = match config.uaa_admin_client() {
            Some(client) => {
                let base = catalog.base(Endpoint::Uaa)?.to_string();
                Some(TokenManager::new(
                    Arc::clone(&http),
                    &base,
                    client,
                    Grant::ClientCredentials,
                ))
            }
            None => None,
        };

        info!(
            api = %config.api_url,
            v2 = ?catalog.v2_version.map(|v| v.to_string()),
            v3 = ?catalog.v3_version.map(|v| v.to_string()),
            "connected to platform"
        );

        let options = ClientOptions {
            poll: PollConfig {
                deadline: config.job_poll_timeout,
                ..PollConfig::default()
            },
            ..ClientOptions::default()
        };
        Ok(Self::new(http, catalog, auth, uaa_admin, options))
    }

    pub fn catalog(&self) -> &EndpointCatalog {
        &self.inner.catalog
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.inner.options.poll
    }

    fn token_manager(&self, scope: AuthScope) -> Option<&TokenManager> {
        match scope {
            AuthScope::CloudController => Some(&self.inner.auth),
            AuthScope::UaaAdmin => Some(self.inner.uaa_admin.as_ref().unwrap_or(&self.inner.auth)),
            AuthScope::None => None,
        }
    }

    fn resolve_url(&self, request: &Request) -> Result<String> {
        let base = if request.path.starts_with("http://") || request.path.starts_with("https://") {
            request.path.clone()
        } else {
            self.inner.catalog.url(request.endpoint, &request.path)?
        };
        if request.query.is_empty() {
            return Ok(base);
        }
        let mut url = url::Url::parse(&base).map_err(|e| ApiError::InvalidUrl {
            url: base.clone(),
            message: e.to_string(),
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &request.query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url.to_string())
    }

    /// Send `request` and return the successful response.
    pub async fn send(&self, request: Request) -> Result<RawResponse> {
        let url = self.resolve_url(&request)?;
        let retry = &self.inner.options.retry;
        let manager = self.token_manager(request.auth);
        let mut token = match manager {
            Some(m) => Some(m.access_token().await?),
            None => None,
        };
        let mut refreshed = false;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
            if let Some(t) = &token {
                headers.push(("Authorization".to_string(), format!("bearer {}", t)));
            }
            headers.extend(request.headers.iter().cloned());
            let raw = RawRequest {
                method: request.method,
                url: url.clone(),
                headers,
                body: request.body.clone(),
            };

            let started = Instant::now();
            let response = match self.inner.http.send(&raw).await {
                Ok(response) => response,
                Err(e) if e.is_retryable() && retry.should_retry(attempt) => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(method = %request.method, url = %url, error = %e, attempt, ?delay, "transport failure, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            debug!(
                method = %request.method,
                url = %url,
                status = response.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request"
            );

            if let Some(value) = response.header("X-Cf-Warnings") {
                warnings::push_header(value);
            }
            if response.is_success() {
                return Ok(response);
            }

            if response.status == 401
                && !refreshed
                && let Some(m) = manager
                && let Some(stale) = token.take()
            {
                refreshed = true;
                debug!(url = %url, "token rejected, refreshing");
                token = Some(m.refresh_after_rejection(&stale).await?);
                continue;
            }

            if is_retryable_status(response.status) && retry.should_retry(attempt) {
                let delay = retry.delay_for_attempt(attempt);
                warn!(method = %request.method, url = %url, status = response.status, attempt, ?delay, "platform busy, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(PlatformError::from_body(response.status, &response.body).into());
        }
    }

    /// Send `request` and decode the JSON body.
    pub async fn request_json<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let url = request.path.clone();
        let response = self.send(request).await?;
        serde_json::from_slice(&response.body).map_err(|e| ApiError::InvalidResponse {
            url,
            message: e.to_string(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: impl Into<String>) -> Result<T> {
        self.request_json(Request::get(path)).await
    }
}

async fn fetch_catalog(http: &dyn HttpSend, api_url: &str) -> Result<EndpointCatalog> {
    let url = format!("{}/", api_url.trim_end_matches('/'));
    let response = http
        .send(&RawRequest {
            method: Method::Get,
            url: url.clone(),
            headers: vec![("Accept".into(), "application/json".into())],
            body: Body::Empty,
        })
        .await?;
    if !response.is_success() {
        return Err(PlatformError::from_body(response.status, &response.body).into());
    }
    EndpointCatalog::from_root(api_url, &response.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformErrorKind;
    use crate::testing::{FakePlatform, client_for};
    use serde_json::json;

    #[tokio::test]
    async fn test_bearer_and_query() {
        let fake = FakePlatform::with_defaults();
        fake.respond("GET", "/v2/organizations", 200, json!({"resources": []}));
        let client = client_for(&fake).await;

        client
            .send(Request::get("/v2/organizations").query("q", "name:acme"))
            .await
            .unwrap();

        let req = fake.last_request().unwrap();
        assert_eq!(req.url, "https://api.example.com/v2/organizations?q=name%3Aacme");
        assert_eq!(req.header("authorization"), Some("bearer token-1"));
    }

    #[tokio::test]
    async fn test_platform_error_is_decoded() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "POST",
            "/v2/organizations",
            400,
            json!({"code": 30002, "description": "The organization name is taken: acme", "error_code": "CF-OrganizationNameTaken"}),
        );
        let client = client_for(&fake).await;

        let err = client
            .send(Request::post("/v2/organizations").json(json!({"name": "acme"})))
            .await
            .unwrap_err();
        assert_eq!(err.platform_kind(), Some(PlatformErrorKind::NameTaken));
        assert_eq!(
            err.to_string(),
            "CF-OrganizationNameTaken: The organization name is taken: acme"
        );
    }

    #[tokio::test]
    async fn test_throttling_is_retried() {
        let fake = FakePlatform::with_defaults();
        fake.respond("GET", "/v2/info", 429, json!({}));
        fake.respond("GET", "/v2/info", 503, json!({}));
        fake.respond("GET", "/v2/info", 200, json!({"name": "cf"}));
        let client = client_for(&fake).await;

        let info: Value = client.get_json("/v2/info").await.unwrap();
        assert_eq!(info["name"], "cf");
        assert_eq!(fake.count("GET", "/v2/info"), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let fake = FakePlatform::with_defaults();
        fake.respond("GET", "/v2/info", 503, json!({"error_code": "CF-ServiceUnavailable", "description": "down"}));
        let client = client_for(&fake).await;

        let err = client.send(Request::get("/v2/info")).await.unwrap_err();
        assert_eq!(err.platform_kind(), Some(PlatformErrorKind::Unavailable));
        assert_eq!(fake.count("GET", "/v2/info"), 5);
    }

    #[tokio::test]
    async fn test_warnings_are_collected() {
        let fake = FakePlatform::with_defaults();
        fake.respond_raw(
            "GET",
            "/v2/info",
            RawResponse::new(200, "{}").with_header("X-Cf-Warnings", "quota%20almost%20full"),
        );
        let client = client_for(&fake).await;

        let (result, warnings) = warnings::collect(client.send(Request::get("/v2/info"))).await;
        result.unwrap();
        assert_eq!(warnings, vec!["quota almost full"]);
    }

    #[tokio::test]
    async fn test_unauthenticated_request_has_no_bearer() {
        let fake = FakePlatform::with_defaults();
        fake.respond("GET", "/v2/info", 200, json!({}));
        let client = client_for(&fake).await;

        client
            .send(Request::get("/v2/info").auth(AuthScope::None))
            .await
            .unwrap();
        assert_eq!(fake.last_request().unwrap().header("authorization"), None);
    }
}
