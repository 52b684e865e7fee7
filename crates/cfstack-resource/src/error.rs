//! Provider error types

use cfstack_api::{ApiError, PlatformErrorKind};
use cfstack_config::ConfigError;
use cfstack_manifest::ManifestError;
use std::time::Duration;
use thiserror::Error;

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{source}\n\nRecent logs:\n{logs}")]
    AppFailed { source: ApiError, logs: String },

    #[error("{attribute}: cannot resolve {value:?}: {message}")]
    InvalidRelation {
        attribute: String,
        value: String,
        message: String,
    },

    #[error("changing {} requires replacing the resource", .0.join(", "))]
    RequiresReplace(Vec<String>),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid resource configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid import id {id:?}: expected {expected}")]
    InvalidImportId { id: String, expected: String },

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("provider is not configured")]
    NotConfigured,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        ProviderError::InvalidConfig(message.into())
    }

    fn api(&self) -> Option<&ApiError> {
        match self {
            ProviderError::Api(e) | ProviderError::AppFailed { source: e, .. } => Some(e),
            _ => None,
        }
    }

    /// Stable error kind reported to the host.
    pub fn kind(&self) -> &'static str {
        if let Some(api) = self.api() {
            return match api {
                ApiError::Platform(e) => match e.kind() {
                    PlatformErrorKind::NotFound => "NotFound",
                    PlatformErrorKind::NameTaken => "NameTaken",
                    PlatformErrorKind::InvalidRelation => "InvalidRelation",
                    PlatformErrorKind::QuotaExceeded => "QuotaExceeded",
                    PlatformErrorKind::NotAuthenticated => "Unauthenticated",
                    _ => "Platform",
                },
                ApiError::Unauthenticated(_) => "Unauthenticated",
                ApiError::JobFailed { .. } => "JobFailed",
                ApiError::MinimumApiVersionNotMet { .. } => "MinimumApiVersionNotMet",
                ApiError::Timeout { .. } => "Timeout",
                ApiError::Config(_) => "InvalidConfig",
                _ => "Transport",
            };
        }
        match self {
            ProviderError::Manifest(ManifestError::Interpolation { .. }) => "Interpolation",
            ProviderError::Manifest(_) => "InvalidManifest",
            ProviderError::Config(_) | ProviderError::InvalidConfig(_) => "InvalidConfig",
            ProviderError::InvalidImportId { .. } => "InvalidConfig",
            ProviderError::NotConfigured => "InvalidConfig",
            ProviderError::InvalidRelation { .. } => "InvalidRelation",
            ProviderError::RequiresReplace(_) => "RequiresReplace",
            ProviderError::NotFound(_) => "NotFound",
            ProviderError::UnknownResourceType(_) => "UnknownResourceType",
            ProviderError::Cancelled => "Cancelled",
            ProviderError::Timeout(_) => "Timeout",
            _ => "Internal",
        }
    }

    /// HTTP status of the failing platform call, if any.
    pub fn status(&self) -> Option<u16> {
        match self.api()? {
            ApiError::Platform(e) => Some(e.status),
            _ => None,
        }
    }

    /// Platform error code, e.g. `CF-OrganizationNameTaken`.
    pub fn code(&self) -> Option<&str> {
        match self.api()? {
            ApiError::Platform(e) => Some(e.error_code.as_str()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ProviderError::NotFound(_) => true,
            other => other.api().is_some_and(ApiError::is_not_found),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
