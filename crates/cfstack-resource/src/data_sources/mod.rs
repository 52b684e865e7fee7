//! Read-only lookups

mod by_name;
mod lookups;
mod platform;

use crate::resource::DataSource;
use crate::schema::{Attribute, RelationKind};
use by_name::{ByName, Scope};
use std::sync::Arc;

const IN_ORG: Scope = Scope {
    attribute: "org",
    filter: "organization_guid",
    kind: RelationKind::Org,
};

const IN_SPACE: Scope = Scope {
    attribute: "space",
    filter: "space_guid",
    kind: RelationKind::Space,
};

fn quota_limits() -> Vec<Attribute> {
    vec![
        Attribute::bool("allow_paid_service_plans").field("non_basic_services_allowed"),
        Attribute::int("instance_memory").field("instance_memory_limit"),
        Attribute::int("total_memory").field("memory_limit"),
        Attribute::int("total_app_instances").field("app_instance_limit"),
        Attribute::int("total_routes").field("total_routes"),
        Attribute::int("total_services").field("total_services"),
        Attribute::int("total_route_ports").field("total_reserved_route_ports"),
        Attribute::int("total_service_keys").field("total_service_keys"),
    ]
}

/// Every data source the provider serves.
pub fn all() -> Vec<Arc<dyn DataSource>> {
    let mut org_quota = quota_limits();
    org_quota.push(Attribute::int("total_private_domains"));

    vec![
        Arc::new(platform::Info::new()),
        Arc::new(ByName::new(
            "cloudfoundry_org",
            "/v2/organizations",
            vec![Attribute::string("quota").field("quota_definition_guid")],
        )),
        Arc::new(
            ByName::new(
                "cloudfoundry_space",
                "/v2/spaces",
                vec![
                    Attribute::string("quota").field("space_quota_definition_guid"),
                    Attribute::bool("allow_ssh"),
                ],
            )
            .within(IN_ORG),
        ),
        Arc::new(ByName::new(
            "cloudfoundry_stack",
            "/v2/stacks",
            vec![Attribute::string("description")],
        )),
        Arc::new(ByName::new(
            "cloudfoundry_org_quota",
            "/v2/quota_definitions",
            org_quota,
        )),
        Arc::new(
            ByName::new(
                "cloudfoundry_space_quota",
                "/v2/space_quota_definitions",
                quota_limits(),
            )
            .within(IN_ORG),
        ),
        Arc::new(ByName::new(
            "cloudfoundry_asg",
            "/v2/security_groups",
            vec![Attribute::block("rules")],
        )),
        Arc::new(
            ByName::new(
                "cloudfoundry_app",
                "/v2/apps",
                vec![
                    Attribute::int("instances"),
                    Attribute::int("memory"),
                    Attribute::int("disk_quota"),
                    Attribute::string("stack").field("stack_guid"),
                    Attribute::string("buildpack"),
                    Attribute::string("command"),
                    Attribute::string("state"),
                    Attribute::string("health_check_type"),
                    Attribute::map("environment")
                        .field("environment_json")
                        .sensitive(),
                ],
            )
            .within(IN_SPACE),
        ),
        Arc::new(lookups::DomainLookup::new()),
        Arc::new(lookups::IsolationSegmentLookup::new()),
        Arc::new(lookups::ServiceInstanceLookup::new()),
        Arc::new(lookups::ServicePlanLookup::new()),
        Arc::new(lookups::ServiceLookup::new()),
        Arc::new(lookups::RouterGroupLookup::new()),
        Arc::new(lookups::UserLookup::new()),
        Arc::new(platform::AppLogs::new()),
        Arc::new(platform::ManifestDoc::new()),
    ]
}
