//! Managed resource kinds

mod app;
mod asg_bindings;
mod domain;
mod feature_flags;
mod generic;
mod isolation_segment;
mod network_policy;
mod org;
mod roles;
mod route;
mod service_access;
mod service_broker;
mod service_instance;
mod space;
mod user;

use crate::error::Result;
use crate::resource::{OpContext, Resource};
use crate::schema::RelationKind;
use crate::state::{Attrs, AttrsExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use app::App;
pub(crate) use app::manifest_source;

/// Every resource kind the provider serves.
pub fn all() -> Vec<Arc<dyn Resource>> {
    vec![
        Arc::new(org::Org::new()),
        Arc::new(space::Space::new()),
        Arc::new(App::new()),
        Arc::new(route::Route::new()),
        Arc::new(route::RouteServiceBinding::new()),
        Arc::new(domain::Domain::new()),
        Arc::new(service_instance::ServiceInstance::new()),
        Arc::new(generic::user_provided_service()),
        Arc::new(service_instance::ServiceKey::new()),
        Arc::new(service_broker::ServiceBroker::new()),
        Arc::new(user::User::new()),
        Arc::new(roles::OrgRoleEdge::new()),
        Arc::new(roles::SpaceRoleEdge::new()),
        Arc::new(generic::org_quota()),
        Arc::new(generic::space_quota()),
        Arc::new(generic::asg()),
        Arc::new(isolation_segment::IsolationSegment::new()),
        Arc::new(isolation_segment::Entitlement::new()),
        Arc::new(network_policy::NetworkPolicyResource::new()),
        Arc::new(service_access::ServicePlanAccess::new()),
        Arc::new(service_access::ServicePlanAccess::legacy()),
        Arc::new(service_access::ServiceInstanceSharing::new()),
        Arc::new(asg_bindings::SpaceAsgs::new()),
        Arc::new(asg_bindings::DefaultAsg::new()),
        Arc::new(feature_flags::FeatureFlags::new()),
    ]
}

/// `Some` on success, `None` when the platform reports the entity gone.
pub(crate) fn found<T>(result: cfstack_api::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Entries to add and to remove to turn `current` into `desired`.
pub(crate) fn set_delta(current: &[String], desired: &[String]) -> (Vec<String>, Vec<String>) {
    let current: BTreeSet<&String> = current.iter().collect();
    let desired: BTreeSet<&String> = desired.iter().collect();
    let add = desired.difference(&current).map(|s| (*s).clone()).collect();
    let remove = current.difference(&desired).map(|s| (*s).clone()).collect();
    (add, remove)
}

/// Guids of a recorded reference list, which may hold names.
pub(crate) async fn recorded_guids(
    ctx: &OpContext,
    state: &Attrs,
    attribute: &str,
    kind: RelationKind,
    scope: Option<&str>,
) -> Result<Vec<String>> {
    let mut guids = Vec::new();
    for value in state.strings(attribute) {
        guids.push(ctx.resolver.resolve(attribute, kind, &value, scope).await?);
    }
    Ok(guids)
}

/// Guid of a recorded single reference, which may be a name.
pub(crate) async fn recorded_guid(
    ctx: &OpContext,
    state: &Attrs,
    attribute: &str,
    kind: RelationKind,
) -> Result<Option<String>> {
    match state.str_attr(attribute) {
        Some(value) => Ok(Some(ctx.resolver.resolve(attribute, kind, value, None).await?)),
        None => Ok(None),
    }
}

pub(crate) fn seconds(config: &Attrs, attribute: &str, default: u64) -> Duration {
    let secs = config
        .int_attr(attribute)
        .and_then(|s| u64::try_from(s).ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}
