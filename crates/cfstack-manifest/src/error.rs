use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("invalid YAML in {path}: {message}")]
    InvalidYaml { path: PathBuf, message: String },

    #[error("expected to find variables: {}", .missing.join(", "))]
    Interpolation { missing: Vec<String> },

    #[error("variable '{0}' is not a scalar and cannot be embedded in a string")]
    NonScalarVariable(String),

    #[error("invalid variable '{0}': expected name=value")]
    InvalidVariable(String),

    #[error("vars file {0} must contain a YAML map")]
    InvalidVarsFile(PathBuf),

    #[error("manifest must have at least one application")]
    NoApplications,

    #[error("application at index {0} has no name")]
    MissingName(usize),

    #[error("path for application '{app}' does not exist: {path}")]
    InvalidApplicationPath { app: String, path: PathBuf },

    #[error("application '{0}' not found in manifest")]
    AppNotInManifest(String),
}

pub type Result<T> = std::result::Result<T, ManifestError>;
