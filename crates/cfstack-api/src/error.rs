//! API client error types

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// API client errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },

    #[error("{0}")]
    Platform(#[from] PlatformError),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("job {guid} failed: {message}")]
    JobFailed { guid: String, message: String },

    #[error("minimum API version {minimum} not met (platform reports {current})")]
    MinimumApiVersionNotMet { current: String, minimum: String },

    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("endpoint {0} is not advertised by the platform")]
    EndpointUnavailable(String),

    #[error("invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("bits packaging failed: {0}")]
    Packaging(String),

    #[error(transparent)]
    Config(#[from] cfstack_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    pub fn transport(message: impl Into<String>, retryable: bool) -> Self {
        ApiError::Transport {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the transport may resend the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport { retryable: true, .. })
    }

    pub fn platform_kind(&self) -> Option<PlatformErrorKind> {
        match self {
            ApiError::Platform(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.platform_kind() == Some(PlatformErrorKind::NotFound)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        // Only failures where the request never reached the server are safe
        // to resend.
        let retryable = e.is_connect() || e.is_timeout();
        ApiError::Transport {
            message: e.to_string(),
            retryable,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Classification of documented platform error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    NotFound,
    NameTaken,
    InvalidRelation,
    QuotaExceeded,
    NotAuthorized,
    NotAuthenticated,
    AssociationNotEmpty,
    InvalidRequest,
    Unavailable,
    Other,
}

impl PlatformErrorKind {
    fn from_code(error_code: &str, status: u16) -> Self {
        match error_code {
            "CF-NotFound"
            | "CF-ResourceNotFound"
            | "CF-OrganizationNotFound"
            | "CF-SpaceNotFound"
            | "CF-AppNotFound"
            | "CF-RouteNotFound"
            | "CF-DomainNotFound"
            | "CF-ServiceInstanceNotFound"
            | "CF-ServiceKeyNotFound"
            | "CF-ServiceBrokerNotFound"
            | "CF-ServicePlanNotFound"
            | "CF-ServiceBindingNotFound"
            | "CF-UserNotFound"
            | "CF-QuotaDefinitionNotFound"
            | "CF-SpaceQuotaDefinitionNotFound"
            | "CF-SecurityGroupNotFound"
            | "CF-StackNotFound"
            | "CF-IsolationSegmentNotFound"
            | "scim_resource_not_found" => PlatformErrorKind::NotFound,

            "CF-OrganizationNameTaken"
            | "CF-SpaceNameTaken"
            | "CF-AppNameTaken"
            | "CF-RouteHostTaken"
            | "CF-RoutePathTaken"
            | "CF-RoutePortTaken"
            | "CF-DomainNameTaken"
            | "CF-ServiceInstanceNameTaken"
            | "CF-ServiceKeyNameTaken"
            | "CF-ServiceBrokerNameTaken"
            | "CF-ServiceBrokerUrlTaken"
            | "CF-QuotaDefinitionNameTaken"
            | "CF-SpaceQuotaDefinitionNameTaken"
            | "CF-SecurityGroupNameTaken"
            | "CF-UniquenessError"
            | "scim_resource_already_exists" => PlatformErrorKind::NameTaken,

            "CF-InvalidRelation" => PlatformErrorKind::InvalidRelation,

            "CF-AppMemoryQuotaExceeded"
            | "CF-QuotaInstanceLimitExceeded"
            | "CF-QuotaInstanceMemoryLimitExceeded"
            | "CF-SpaceQuotaMemoryLimitExceeded"
            | "CF-SpaceQuotaInstanceLimitExceeded"
            | "CF-ServiceInstanceQuotaExceeded"
            | "CF-ServiceInstanceSpaceQuotaExceeded"
            | "CF-OrgQuotaTotalRoutesExceeded"
            | "CF-SpaceQuotaTotalRoutesExceeded" => PlatformErrorKind::QuotaExceeded,

            "CF-NotAuthorized" => PlatformErrorKind::NotAuthorized,
            "CF-InvalidAuthToken" | "CF-NotAuthenticated" | "invalid_token" => {
                PlatformErrorKind::NotAuthenticated
            }
            "CF-AssociationNotEmpty" | "CF-NonrecursiveSpaceDeletionFailed" => {
                PlatformErrorKind::AssociationNotEmpty
            }
            "CF-UaaUnavailable" | "CF-ServiceUnavailable" => PlatformErrorKind::Unavailable,
            "CF-MessageParseError" | "CF-InvalidRequest" | "CF-UnprocessableEntity" => {
                PlatformErrorKind::InvalidRequest
            }
            _ => match status {
                404 => PlatformErrorKind::NotFound,
                401 => PlatformErrorKind::NotAuthenticated,
                403 => PlatformErrorKind::NotAuthorized,
                400 | 422 => PlatformErrorKind::InvalidRequest,
                502..=504 => PlatformErrorKind::Unavailable,
                _ => PlatformErrorKind::Other,
            },
        }
    }
}

/// Structured error returned by the platform for a non-2xx response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error_code}: {description}")]
pub struct PlatformError {
    pub status: u16,
    pub code: Option<i64>,
    pub error_code: String,
    pub description: String,
}

impl PlatformError {
    pub fn kind(&self) -> PlatformErrorKind {
        PlatformErrorKind::from_code(&self.error_code, self.status)
    }

    /// Decode any of the platform's error body shapes.
    ///
    /// v2 returns `{code, description, error_code}`, v3 returns
    /// `{errors: [{code, title, detail}]}` and the identity service returns
    /// `{error, error_description}`.
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        #[derive(Deserialize)]
        struct V2Body {
            code: Option<i64>,
            description: Option<String>,
            error_code: Option<String>,
        }
        #[derive(Deserialize)]
        struct V3Item {
            code: Option<i64>,
            title: Option<String>,
            detail: Option<String>,
        }
        #[derive(Deserialize)]
        struct V3Body {
            errors: Vec<V3Item>,
        }
        #[derive(Deserialize)]
        struct UaaBody {
            error: String,
            error_description: Option<String>,
            message: Option<String>,
        }

        if let Ok(v3) = serde_json::from_slice::<V3Body>(body)
            && let Some(first) = v3.errors.into_iter().next()
        {
            return Self {
                status,
                code: first.code,
                error_code: first.title.unwrap_or_else(|| format!("HTTP-{}", status)),
                description: first.detail.unwrap_or_default(),
            };
        }
        if let Ok(v2) = serde_json::from_slice::<V2Body>(body)
            && (v2.error_code.is_some() || v2.description.is_some())
        {
            return Self {
                status,
                code: v2.code,
                error_code: v2.error_code.unwrap_or_else(|| format!("HTTP-{}", status)),
                description: v2.description.unwrap_or_default(),
            };
        }
        if let Ok(uaa) = serde_json::from_slice::<UaaBody>(body) {
            return Self {
                status,
                code: None,
                description: uaa
                    .error_description
                    .or(uaa.message)
                    .unwrap_or_else(|| uaa.error.clone()),
                error_code: uaa.error,
            };
        }
        Self {
            status,
            code: None,
            error_code: format!("HTTP-{}", status),
            description: String::from_utf8_lossy(body).trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_error_body() {
        let body = br#"{"code":30002,"description":"The organization name is taken: acme","error_code":"CF-OrganizationNameTaken"}"#;
        let err = PlatformError::from_body(400, body);
        assert_eq!(err.code, Some(30002));
        assert_eq!(err.kind(), PlatformErrorKind::NameTaken);
        assert_eq!(
            err.to_string(),
            "CF-OrganizationNameTaken: The organization name is taken: acme"
        );
    }

    #[test]
    fn test_v3_error_body() {
        let body = br#"{"errors":[{"code":10010,"title":"CF-ResourceNotFound","detail":"App not found"}]}"#;
        let err = PlatformError::from_body(404, body);
        assert_eq!(err.error_code, "CF-ResourceNotFound");
        assert_eq!(err.kind(), PlatformErrorKind::NotFound);
    }

    #[test]
    fn test_uaa_error_body() {
        let body = br#"{"error":"invalid_token","error_description":"Invalid refresh token"}"#;
        let err = PlatformError::from_body(400, body);
        assert_eq!(err.kind(), PlatformErrorKind::NotAuthenticated);
        assert_eq!(err.description, "Invalid refresh token");
    }

    #[test]
    fn test_unstructured_body_falls_back_to_status() {
        let err = PlatformError::from_body(404, b"<html>nope</html>");
        assert_eq!(err.error_code, "HTTP-404");
        assert_eq!(err.kind(), PlatformErrorKind::NotFound);

        let err = PlatformError::from_body(500, b"");
        assert_eq!(err.kind(), PlatformErrorKind::Other);
    }
}
