//! Wire layer
//!
//! [`HttpSend`] is the only place bytes leave the process. Request logic
//! (auth, retry, error decoding) lives in [`crate::client::CfClient`] and is
//! written against this trait so it can be driven by the in-memory platform
//! in tests.

use crate::error::{ApiError, Result};
use async_trait::async_trait;
use cfstack_config::ProviderConfig;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const KEEPALIVE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether the method changes remote state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multipart upload streamed from a file on disk
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    /// Form field carrying the file
    pub field: String,
    pub file_name: String,
    pub path: PathBuf,
    /// Additional plain text form fields
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Upload(Upload),
}

/// Fully resolved request handed to the wire
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl RawRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Response with its body already drained
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Sends one request and returns the drained response.
///
/// Implementations report connection-level failures as
/// [`ApiError::Transport`]; HTTP error statuses are returned as responses.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, request: &RawRequest) -> Result<RawResponse>;
}

/// Production [`HttpSend`] backed by a shared `reqwest::Client`
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    /// Build the client shared by every endpoint.
    ///
    /// TLS verification and the extra trust root apply to the cloud
    /// controller, the identity service, log cache and networking alike.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(DIAL_TIMEOUT)
            .tcp_keepalive(KEEPALIVE)
            .user_agent(concat!("cfstack/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(config.skip_ssl_validation);

        if let Some(pem) = &config.ca_cert {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| ApiError::transport(format!("invalid ca_cert: {}", e), false))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| ApiError::transport(e.to_string(), false))?;
        Ok(Self { client })
    }

    async fn build(&self, request: &RawRequest) -> Result<reqwest::RequestBuilder> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Form(pairs) => builder.form(pairs),
            Body::Upload(upload) => {
                // Re-opened on every attempt so retries resend the whole file.
                let file = tokio::fs::File::open(&upload.path).await?;
                let len = file.metadata().await?.len();
                let part = reqwest::multipart::Part::stream_with_length(
                    reqwest::Body::from(file),
                    len,
                )
                .file_name(upload.file_name.clone())
                .mime_str("application/zip")
                .map_err(|e| ApiError::transport(e.to_string(), false))?;
                let mut form = reqwest::multipart::Form::new();
                for (name, value) in &upload.fields {
                    form = form.text(name.clone(), value.clone());
                }
                builder.multipart(form.part(upload.field.clone(), part))
            }
        };
        Ok(builder)
    }
}

#[async_trait]
impl HttpSend for ReqwestSender {
    async fn send(&self, request: &RawRequest) -> Result<RawResponse> {
        let response = self.build(request).await?.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
