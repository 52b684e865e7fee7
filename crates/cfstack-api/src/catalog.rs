//! Endpoint discovery from the API root document

use crate::error::{ApiError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Services advertised by the platform root document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Cloud controller root; request paths carry the `/v2` or `/v3` prefix.
    CloudController,
    Uaa,
    Login,
    LogCache,
    Routing,
    NetworkPolicy,
}

impl Endpoint {
    fn link_name(&self) -> &'static str {
        match self {
            Endpoint::CloudController => "self",
            Endpoint::Uaa => "uaa",
            Endpoint::Login => "login",
            Endpoint::LogCache => "log_cache",
            Endpoint::Routing => "routing",
            Endpoint::NetworkPolicy => "network_policy_v1",
        }
    }
}

/// Dotted API version, compared numerically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for ApiVersion {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().splitn(3, '.').map(|p| {
            // Tolerate build suffixes such as "3.85.0-rc1".
            let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        });
        let mut next = || parts.next().flatten();
        match next() {
            Some(major) => Ok(ApiVersion::new(major, next().unwrap_or(0), next().unwrap_or(0))),
            None => Err(ApiError::InvalidResponse {
                url: "/".into(),
                message: format!("unparseable API version {:?}", s),
            }),
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    #[serde(default)]
    meta: Option<LinkMeta>,
}

#[derive(Debug, Deserialize)]
struct LinkMeta {
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RootDocument {
    links: HashMap<String, Option<Link>>,
}

/// Base URLs and API versions, fetched once per provider instance
#[derive(Debug, Clone)]
pub struct EndpointCatalog {
    urls: HashMap<Endpoint, String>,
    pub v2_version: Option<ApiVersion>,
    pub v3_version: Option<ApiVersion>,
}

impl EndpointCatalog {
    /// Decode the root document served at `GET {api_url}/`.
    pub fn from_root(api_url: &str, body: &[u8]) -> Result<Self> {
        let doc: RootDocument =
            serde_json::from_slice(body).map_err(|e| ApiError::InvalidResponse {
                url: api_url.to_string(),
                message: format!("not a platform root document: {}", e),
            })?;

        let mut urls = HashMap::new();
        for endpoint in [
            Endpoint::CloudController,
            Endpoint::Uaa,
            Endpoint::Login,
            Endpoint::LogCache,
            Endpoint::Routing,
            Endpoint::NetworkPolicy,
        ] {
            if let Some(Some(link)) = doc.links.get(endpoint.link_name()) {
                urls.insert(endpoint, link.href.trim_end_matches('/').to_string());
            }
        }
        urls.entry(Endpoint::CloudController)
            .or_insert_with(|| api_url.trim_end_matches('/').to_string());

        let version = |name: &str| -> Option<ApiVersion> {
            doc.links
                .get(name)?
                .as_ref()?
                .meta
                .as_ref()?
                .version
                .as_deref()?
                .parse()
                .ok()
        };

        Ok(Self {
            urls,
            v2_version: version("cloud_controller_v2"),
            v3_version: version("cloud_controller_v3"),
        })
    }

    /// Base URL of `endpoint`, without trailing slash.
    pub fn base(&self, endpoint: Endpoint) -> Result<&str> {
        self.urls
            .get(&endpoint)
            .map(String::as_str)
            .ok_or_else(|| ApiError::EndpointUnavailable(endpoint.link_name().to_string()))
    }

    /// Absolute URL of `path` under `endpoint`.
    pub fn url(&self, endpoint: Endpoint, path: &str) -> Result<String> {
        let base = self.base(endpoint)?;
        if path.is_empty() {
            return Ok(base.to_string());
        }
        let sep = if path.starts_with('/') { "" } else { "/" };
        Ok(format!("{}{}{}", base, sep, path))
    }

    /// Identity service base for token grants: `login` when advertised.
    pub fn auth_base(&self) -> Result<&str> {
        self.base(Endpoint::Login)
            .or_else(|_| self.base(Endpoint::Uaa))
    }

    pub fn has(&self, endpoint: Endpoint) -> bool {
        self.urls.contains_key(&endpoint)
    }

    /// Fail unless the v3 API is at least `minimum`.
    pub fn require_v3(&self, minimum: ApiVersion) -> Result<()> {
        match self.v3_version {
            Some(current) if current >= minimum => Ok(()),
            current => Err(ApiError::MinimumApiVersionNotMet {
                current: current
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                minimum: minimum.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = r#"{
        "links": {
            "self": {"href": "https://api.example.com"},
            "cloud_controller_v2": {"href": "https://api.example.com/v2", "meta": {"version": "2.150.0"}},
            "cloud_controller_v3": {"href": "https://api.example.com/v3", "meta": {"version": "3.85.0"}},
            "uaa": {"href": "https://uaa.example.com"},
            "login": {"href": "https://login.example.com/"},
            "log_cache": {"href": "https://log-cache.example.com"},
            "network_policy_v1": {"href": "https://api.example.com/networking/v1/external"},
            "routing": null
        }
    }"#;

    #[test]
    fn test_from_root() {
        let catalog = EndpointCatalog::from_root("https://api.example.com", ROOT.as_bytes()).unwrap();
        assert_eq!(
            catalog.url(Endpoint::CloudController, "/v2/organizations").unwrap(),
            "https://api.example.com/v2/organizations"
        );
        assert_eq!(catalog.auth_base().unwrap(), "https://login.example.com");
        assert_eq!(catalog.v3_version, Some(ApiVersion::new(3, 85, 0)));
        assert!(!catalog.has(Endpoint::Routing));
        assert!(matches!(
            catalog.base(Endpoint::Routing),
            Err(ApiError::EndpointUnavailable(_))
        ));
    }

    #[test]
    fn test_require_v3() {
        let catalog = EndpointCatalog::from_root("https://api.example.com", ROOT.as_bytes()).unwrap();
        assert!(catalog.require_v3(ApiVersion::new(3, 11, 0)).is_ok());

        let err = catalog.require_v3(ApiVersion::new(3, 99, 0)).unwrap_err();
        match err {
            ApiError::MinimumApiVersionNotMet { current, minimum } => {
                assert_eq!(current, "3.85.0");
                assert_eq!(minimum, "3.99.0");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_version_ordering() {
        let a: ApiVersion = "3.9.0".parse().unwrap();
        let b: ApiVersion = "3.11.0".parse().unwrap();
        assert!(a < b);
        assert_eq!("2.150".parse::<ApiVersion>().unwrap(), ApiVersion::new(2, 150, 0));
        assert!("x.y".parse::<ApiVersion>().is_err());
    }
}
