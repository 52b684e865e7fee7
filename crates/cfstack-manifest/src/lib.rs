//! Application manifest loading for cfstack
//!
//! - `((var))` interpolation from vars files and inline variables
//! - validation of the `applications` list

pub mod error;
pub mod interpolate;
pub mod manifest;

pub use error::{ManifestError, Result};
pub use interpolate::{Interpolator, Variables};
pub use manifest::{
    Application, Manifest, ManifestDocker, ManifestRoute, ManifestService, ManifestSource,
};
