//! Scripted in-memory platform for tests
//!
//! Responses are scripted per `METHOD path[?query]`. Each script is a queue;
//! the last response of a queue repeats. A script with a query matches only
//! requests carrying all of its pairs, and wins over a bare-path script.
//! Unscripted requests get a `CF-NotFound` 404.

use crate::auth::{Grant, TokenManager};
use crate::catalog::EndpointCatalog;
use crate::client::{CfClient, ClientOptions};
use crate::error::{ApiError, Result};
use crate::http::{HttpSend, RawRequest, RawResponse};
use crate::job::PollConfig;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use cfstack_config::OAuthClient;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const API_URL: &str = "https://api.example.com";

enum Scripted {
    Response(RawResponse),
    TransportError { retryable: bool },
}

struct Script {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    queue: VecDeque<Scripted>,
}

impl Script {
    fn matches(&self, method: &str, path: &str, query: &[(String, String)]) -> bool {
        self.method == method && self.path == path && self.query.iter().all(|p| query.contains(p))
    }
}

#[derive(Default)]
struct State {
    scripts: Vec<Script>,
    requests: Vec<RawRequest>,
}

/// In-memory [`HttpSend`] recording every request
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<State>>,
}

fn split(url_or_path: &str) -> (String, Vec<(String, String)>) {
    let absolute = if url_or_path.starts_with("http") {
        url_or_path.to_string()
    } else {
        format!("http://fake{}", url_or_path)
    };
    match url::Url::parse(&absolute) {
        Ok(url) => (
            url.path().to_string(),
            url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect(),
        ),
        Err(_) => (url_or_path.to_string(), Vec::new()),
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform with a root document and a token endpoint issuing
    /// `token-1`, `token-2`, ... on each grant.
    pub fn with_defaults() -> Self {
        let fake = Self::new();
        fake.respond("GET", "/", 200, root_document());
        for n in 1..=5 {
            fake.respond(
                "POST",
                "/oauth/token",
                200,
                json!({
                    "access_token": format!("token-{}", n),
                    "refresh_token": format!("refresh-{}", n),
                    "expires_in": 3600,
                    "token_type": "bearer",
                }),
            );
        }
        fake
    }

    pub fn sender(&self) -> Arc<dyn HttpSend> {
        Arc::new(self.clone())
    }

    fn push(&self, method: &str, path: &str, scripted: Scripted) {
        let (path, query) = split(path);
        let mut state = self.state.lock().unwrap();
        if let Some(script) = state
            .scripts
            .iter_mut()
            .find(|s| s.method == method && s.path == path && s.query == query)
        {
            script.queue.push_back(scripted);
            return;
        }
        state.scripts.push(Script {
            method: method.to_string(),
            path,
            query,
            queue: VecDeque::from([scripted]),
        });
    }

    pub fn respond(&self, method: &str, path: &str, status: u16, body: Value) {
        let bytes = serde_json::to_vec(&body).unwrap_or_default();
        self.push(method, path, Scripted::Response(RawResponse::new(status, bytes)));
    }

    pub fn respond_raw(&self, method: &str, path: &str, response: RawResponse) {
        self.push(method, path, Scripted::Response(response));
    }

    pub fn fail_transport(&self, method: &str, path: &str, retryable: bool) {
        self.push(method, path, Scripted::TransportError { retryable });
    }

    /// Drop every queued response for `method path`.
    pub fn clear(&self, method: &str, path: &str) {
        let (path, query) = split(path);
        let mut state = self.state.lock().unwrap();
        state
            .scripts
            .retain(|s| !(s.method == method && s.path == path && s.query == query));
    }

    pub fn requests(&self) -> Vec<RawRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn last_request(&self) -> Option<RawRequest> {
        self.state.lock().unwrap().requests.last().cloned()
    }

    /// Requests whose method and path match; query pairs in `path` must all
    /// be present.
    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RawRequest> {
        let (path, query) = split(path);
        self.requests()
            .into_iter()
            .filter(|r| {
                let (rp, rq) = split(&r.url);
                r.method.as_str() == method && rp == path && query.iter().all(|p| rq.contains(p))
            })
            .collect()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests_to(method, path).len()
    }

    /// Requests that change remote state, excluding token grants.
    pub fn mutating_requests(&self) -> Vec<RawRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method.is_mutating() && !r.url.ends_with("/oauth/token"))
            .collect()
    }

    /// Forget recorded requests; scripts are kept.
    pub fn reset_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }
}

#[async_trait]
impl HttpSend for FakePlatform {
    async fn send(&self, request: &RawRequest) -> Result<RawResponse> {
        let (path, query) = split(&request.url);
        let method = request.method.as_str();
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        let best = state
            .scripts
            .iter_mut()
            .filter(|s| s.matches(method, &path, &query))
            .max_by_key(|s| s.query.len());
        let scripted = match best {
            Some(script) if script.queue.len() > 1 => script.queue.pop_front(),
            Some(script) => script.queue.front().map(|s| match s {
                Scripted::Response(r) => Scripted::Response(r.clone()),
                Scripted::TransportError { retryable } => Scripted::TransportError {
                    retryable: *retryable,
                },
            }),
            None => None,
        };

        match scripted {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::TransportError { retryable }) => {
                Err(ApiError::transport("connection reset by peer", retryable))
            }
            None => Ok(RawResponse::new(
                404,
                serde_json::to_vec(&json!({
                    "code": 10000,
                    "description": format!("Unknown request {} {}", method, path),
                    "error_code": "CF-NotFound",
                }))
                .unwrap_or_default(),
            )),
        }
    }
}

/// Root document advertising every endpoint on the fake host names.
pub fn root_document() -> Value {
    json!({
        "links": {
            "self": {"href": API_URL},
            "cloud_controller_v2": {"href": format!("{}/v2", API_URL), "meta": {"version": "2.150.0"}},
            "cloud_controller_v3": {"href": format!("{}/v3", API_URL), "meta": {"version": "3.85.0"}},
            "uaa": {"href": "https://uaa.example.com"},
            "login": {"href": "https://login.example.com"},
            "log_cache": {"href": "https://log-cache.example.com"},
            "routing": {"href": format!("{}/routing", API_URL)},
            "network_policy_v1": {"href": format!("{}/networking/v1/external", API_URL)},
        }
    })
}

/// Options with no retry or poll delays.
pub fn fast_options() -> ClientOptions {
    ClientOptions {
        retry: RetryPolicy::immediate(5),
        poll: PollConfig {
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_millis(1),
            deadline: Duration::from_secs(5),
        },
    }
}

/// Authenticated client against `fake`, which must serve the default root
/// document and token endpoint (see [`FakePlatform::with_defaults`]).
pub async fn client_for(fake: &FakePlatform) -> CfClient {
    let catalog = EndpointCatalog::from_root(
        API_URL,
        &serde_json::to_vec(&root_document()).unwrap_or_default(),
    )
    .unwrap_or_else(|e| panic!("root document: {e}"));
    let auth = TokenManager::new(
        fake.sender(),
        "https://login.example.com",
        OAuthClient {
            id: "cf".into(),
            secret: String::new(),
        },
        Grant::Password {
            username: "admin".into(),
            password: "admin".into(),
        },
    );
    auth.authenticate()
        .await
        .unwrap_or_else(|e| panic!("authenticate: {e}"));
    let client = CfClient::new(fake.sender(), catalog, auth, None, fast_options());
    fake.reset_requests();
    client
}
