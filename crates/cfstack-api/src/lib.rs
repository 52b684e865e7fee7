//! Cloud Foundry platform API client
//!
//! Covers the cloud controller (v2 and v3), the identity service, log cache
//! and the networking API. Request logic is written against [`HttpSend`] so
//! it can run against the in-memory platform in [`testing`].

pub mod auth;
pub mod bits;
pub mod catalog;
pub mod client;
pub mod error;
pub mod http;
pub mod job;
pub mod pagination;
pub mod resources;
pub mod retry;
pub mod warnings;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use catalog::{ApiVersion, Endpoint, EndpointCatalog};
pub use client::{AuthScope, CfClient, ClientOptions, Request};
pub use error::{ApiError, PlatformError, PlatformErrorKind, Result};
pub use http::{HttpSend, Method, RawRequest, RawResponse, ReqwestSender};
pub use job::{PollConfig, PollStatus};
pub use pagination::{Metadata, V2, V2Query};
pub use resources::DeleteOptions;
