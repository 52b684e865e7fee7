//! Resource kinds, data sources and the reconciliation dispatcher
//!
//! Each kind declares a [`Schema`] and implements the raw platform calls;
//! [`Provider`] adds validation, name resolution, read-after-write and drift
//! detection on top.

pub mod data_sources;
pub mod diff;
pub mod dispatcher;
pub mod error;
pub mod mapper;
pub mod normalize;
pub mod relations;
pub mod resource;
mod resources;
pub mod schema;
pub mod session;
pub mod state;

pub use diff::{ActionType, ChangeSet, PlanResult};
pub use dispatcher::{Provider, run};
pub use error::{ProviderError, Result};
pub use resource::{DataSource, OpContext, Resource};
pub use schema::{AttrType, Attribute, Presence, RelationKind, Schema};
pub use session::Session;
pub use state::{Attrs, AttrsExt, ResourceData, attrs};
