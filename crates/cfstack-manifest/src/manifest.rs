//! Application manifests
//!
//! Loading order: vars files, inline vars, `((var))` interpolation, then
//! deserialization and validation of the `applications` list.

use crate::error::{ManifestError, Result};
use crate::interpolate::{self, Interpolator};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Inputs needed to load a manifest
#[derive(Debug, Clone, Default)]
pub struct ManifestSource {
    pub path: PathBuf,
    pub vars_files: Vec<PathBuf>,
    /// Inline variables. Strings are typed like `name=value` pairs, other
    /// JSON values keep their type.
    pub vars: BTreeMap<String, serde_json::Value>,
}

impl ManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn vars_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.vars_files.push(path.into());
        self
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    fn interpolator(&self) -> Result<Interpolator> {
        let mut interpolator = Interpolator::new();
        for file in &self.vars_files {
            interpolator.add_vars_file(file)?;
        }
        for (name, value) in &self.vars {
            let value = match value {
                serde_json::Value::String(text) => interpolate::scalar(text),
                other => serde_yaml::to_value(other)
                    .map_err(|e| ManifestError::InvalidVariable(format!("{name}: {e}")))?,
            };
            interpolator.add_var(name.clone(), value);
        }
        Ok(interpolator)
    }

    /// Read, interpolate and validate the manifest.
    #[instrument(skip(self), fields(manifest = %self.path.display()))]
    pub fn load(&self) -> Result<Manifest> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| ManifestError::Io {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let doc = self.interpolator()?.interpolate_str(&content, &self.path)?;
        let base = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Manifest::from_value(doc, &self.path, &base)
    }
}

/// A route entry, `- route: host.domain/path`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRoute {
    pub route: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDocker {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Either `- my-db` or `- name: my-db` with binding parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestService {
    Name(String),
    Detailed {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parameters: Option<serde_json::Value>,
    },
}

impl ManifestService {
    pub fn name(&self) -> &str {
        match self {
            ManifestService::Name(name) => name,
            ManifestService::Detailed { name, .. } => name,
        }
    }

    pub fn parameters(&self) -> Option<&serde_json::Value> {
        match self {
            ManifestService::Name(_) => None,
            ManifestService::Detailed { parameters, .. } => parameters.as_ref(),
        }
    }
}

/// One entry of `applications:`
///
/// Sizes stay as written (`512M`, `1G`, `256`); conversion to megabytes
/// happens where the attribute is normalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildpack: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buildpacks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub disk_quota: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<ManifestDocker>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, serde_json::Value>,
    #[serde(
        rename = "health-check-type",
        alias = "health_check_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub health_check_type: Option<String>,
    #[serde(
        rename = "health-check-http-endpoint",
        alias = "health_check_http_endpoint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub health_check_http_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<u32>,
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub memory: Option<String>,
    #[serde(
        rename = "no-route",
        alias = "no_route",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub no_route: Option<bool>,
    #[serde(
        rename = "random-route",
        alias = "random_route",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub random_route: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<ManifestRoute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ManifestService>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Keys this parser does not model, kept for the data source.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Application {
    /// Single buildpack, or the first of `buildpacks`.
    pub fn first_buildpack(&self) -> Option<&str> {
        self.buildpack
            .as_deref()
            .or_else(|| self.buildpacks.first().map(String::as_str))
    }
}

/// Accept `512M` as well as bare numbers like `512`.
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a size, got {other:?}"
            )));
        }
    })
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    applications: Vec<Application>,
}

/// Parsed and validated manifest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub applications: Vec<Application>,
}

impl Manifest {
    /// Validate an interpolated document. Relative application paths are
    /// resolved against `base_dir`, following symlinks.
    pub fn from_value(doc: Value, origin: &Path, base_dir: &Path) -> Result<Self> {
        let raw: RawManifest =
            serde_yaml::from_value(doc).map_err(|e| ManifestError::InvalidYaml {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        if raw.applications.is_empty() {
            return Err(ManifestError::NoApplications);
        }

        let mut applications = Vec::with_capacity(raw.applications.len());
        for (index, mut app) in raw.applications.into_iter().enumerate() {
            if app.name.trim().is_empty() {
                return Err(ManifestError::MissingName(index));
            }
            if let Some(path) = app.path.take() {
                let joined = if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                };
                let resolved = std::fs::canonicalize(&joined).map_err(|_| {
                    ManifestError::InvalidApplicationPath {
                        app: app.name.clone(),
                        path: joined.clone(),
                    }
                })?;
                debug!(app = %app.name, path = %resolved.display(), "resolved application path");
                app.path = Some(resolved);
            }
            applications.push(app);
        }

        info!(applications = applications.len(), "manifest parsed");
        Ok(Self { applications })
    }

    /// The application called `name`.
    pub fn application(&self, name: &str) -> Result<&Application> {
        self.applications
            .iter()
            .find(|app| app.name == name)
            .ok_or_else(|| ManifestError::AppNotInManifest(name.to_string()))
    }
}
