//! End-to-end operations against the scripted platform

use cfstack_api::http::Body;
use cfstack_api::testing::{FakePlatform, client_for};
use cfstack_api::RawResponse;
use cfstack_config::ProviderConfig;
use cfstack_resource::{ActionType, Provider, ProviderError, Session, attrs};
use serde_json::{Value, json};

const ORG: &str = "0d1c9d1e-7a0c-4b8a-9c55-6f6f0a3b1a01";
const QUOTA: &str = "5b0a41f4-1c7e-4a6e-8d4f-2b9d3e7c9a02";
const SPACE: &str = "9e2f3c4d-5a6b-4c7d-8e9f-0a1b2c3d4e03";
const OTHER_SPACE: &str = "1f2e3d4c-5b6a-4978-8695-a4b3c2d1e006";
const APP: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c04";
const SERVICE_INSTANCE: &str = "c3d4e5f6-a7b8-4c9d-8e0f-1a2b3c4d5e05";

async fn provider(fake: &FakePlatform) -> Provider {
    let config = ProviderConfig::from_value(&json!({
        "api_url": "https://api.example.com",
        "user": "admin",
        "password": "admin",
    }))
    .unwrap();
    Provider::with_session(Session::new(client_for(fake).await, config))
}

fn entity(guid: &str, entity: Value) -> Value {
    json!({ "metadata": { "guid": guid }, "entity": entity })
}

fn page(items: Vec<Value>) -> Value {
    json!({ "total_results": items.len(), "next_url": null, "resources": items })
}

fn json_body(body: &Body) -> Value {
    match body {
        Body::Json(value) => value.clone(),
        other => panic!("expected a JSON body, got {:?}", other),
    }
}

fn acme() -> Value {
    entity(ORG, json!({ "name": "acme", "quota_definition_guid": QUOTA }))
}

fn web(memory: i64) -> Value {
    entity(
        APP,
        json!({
            "name": "web",
            "space_guid": SPACE,
            "instances": 1,
            "memory": memory,
            "disk_quota": 1024,
            "health_check_type": "port",
            "state": "STOPPED",
        }),
    )
}

fn web_state(memory: i64) -> Value {
    json!({
        "name": "web",
        "space": SPACE,
        "instances": 1,
        "memory": memory,
        "disk_quota": 1024,
        "health_check_type": "port",
        "stopped": true,
        "staging_timeout": 900,
        "start_timeout": 900,
        "routes": [],
        "service_bindings": [],
    })
}

#[tokio::test]
async fn test_org_create_resolves_quota_name() {
    let fake = FakePlatform::with_defaults();
    fake.respond(
        "GET",
        "/v2/quota_definitions",
        200,
        page(vec![entity(QUOTA, json!({ "name": "small" }))]),
    );
    fake.respond("POST", "/v2/organizations", 201, acme());
    fake.respond("GET", &format!("/v2/organizations/{}", ORG), 200, acme());
    let provider = provider(&fake).await;

    let created = provider
        .create("cloudfoundry_org", &attrs(json!({ "name": "acme", "quota": "small" })))
        .await
        .unwrap();

    assert_eq!(created.id, ORG);
    assert_eq!(created.attrs["name"], "acme");
    // The configured spelling survives while it still names the same quota.
    assert_eq!(created.attrs["quota"], "small");

    let posts = fake.requests_to("POST", "/v2/organizations");
    assert_eq!(posts.len(), 1);
    assert_eq!(
        json_body(&posts[0].body),
        json!({ "name": "acme", "quota_definition_guid": QUOTA })
    );
}

#[tokio::test]
async fn test_org_name_taken_surfaces_platform_error() {
    let fake = FakePlatform::with_defaults();
    fake.respond(
        "POST",
        "/v2/organizations",
        400,
        json!({
            "code": 30002,
            "description": "The organization name is taken: acme",
            "error_code": "CF-OrganizationNameTaken",
        }),
    );
    let provider = provider(&fake).await;

    let err = provider
        .create("cloudfoundry_org", &attrs(json!({ "name": "acme" })))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("CF-OrganizationNameTaken"));
    assert_eq!(err.status(), Some(400));
    assert_eq!(
        err.to_string(),
        "CF-OrganizationNameTaken: The organization name is taken: acme"
    );
}

#[tokio::test]
async fn test_update_with_unchanged_config_is_silent() {
    let fake = FakePlatform::with_defaults();
    fake.respond("GET", &format!("/v2/organizations/{}", ORG), 200, acme());
    let provider = provider(&fake).await;

    let state = attrs(json!({
        "name": "acme",
        "quota": QUOTA,
        "delete_recursive": false,
        "managers": [],
        "billing_managers": [],
        "auditors": [],
    }));
    let config = attrs(json!({ "name": "acme", "quota": QUOTA }));
    let updated = provider
        .update("cloudfoundry_org", ORG, &state, &config)
        .await
        .unwrap();

    assert_eq!(updated.id, ORG);
    assert!(fake.mutating_requests().is_empty());
}

#[tokio::test]
async fn test_app_memory_drift_sends_only_memory() {
    let fake = FakePlatform::with_defaults();
    let path = format!("/v2/apps/{}", APP);
    fake.respond("GET", &path, 200, web(128));
    let provider = provider(&fake).await;

    let config = attrs(json!({ "name": "web", "space": SPACE, "memory": 256, "stopped": true }));
    let plan = provider
        .plan("cloudfoundry_app", Some(APP), &attrs(web_state(128)), &config)
        .await
        .unwrap();
    assert_eq!(plan.action, ActionType::Update);
    assert_eq!(plan.attributes, vec!["memory"]);

    fake.clear("GET", &path);
    fake.respond("GET", &path, 200, web(256));
    fake.respond("PUT", &path, 201, web(256));
    let updated = provider
        .update("cloudfoundry_app", APP, &attrs(web_state(128)), &config)
        .await
        .unwrap();

    assert_eq!(updated.attrs["memory"], 256);
    let mutations = fake.mutating_requests();
    assert_eq!(mutations.len(), 1, "{:?}", mutations);
    assert_eq!(json_body(&mutations[0].body), json!({ "memory": 256 }));
}

#[tokio::test]
async fn test_moving_app_requires_replace() {
    let fake = FakePlatform::with_defaults();
    let provider = provider(&fake).await;

    let config = attrs(json!({ "name": "web", "space": OTHER_SPACE, "memory": 128, "stopped": true }));
    let err = provider
        .update("cloudfoundry_app", APP, &attrs(web_state(128)), &config)
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::RequiresReplace(ref names) if names == &["space"]));
    assert!(fake.mutating_requests().is_empty());
}

#[tokio::test]
async fn test_deleted_org_reads_as_gone() {
    let fake = FakePlatform::with_defaults();
    let path = format!("/v2/organizations/{}", ORG);
    fake.respond("POST", "/v2/organizations", 201, acme());
    fake.respond("GET", &path, 200, acme());
    fake.respond_raw("DELETE", &path, RawResponse::new(204, Vec::new()));
    let provider = provider(&fake).await;

    let created = provider
        .create("cloudfoundry_org", &attrs(json!({ "name": "acme", "quota": QUOTA })))
        .await
        .unwrap();
    provider
        .delete("cloudfoundry_org", &created.id, &created.attrs)
        .await
        .unwrap();
    assert_eq!(fake.count("DELETE", &path), 1);

    fake.clear("GET", &path);
    assert!(provider
        .read("cloudfoundry_org", ORG, &created.attrs)
        .await
        .unwrap()
        .is_none());
    assert!(!provider
        .exists("cloudfoundry_org", ORG, &created.attrs)
        .await
        .unwrap());

    // Deleting again is not an error.
    fake.clear("DELETE", &path);
    provider
        .delete("cloudfoundry_org", ORG, &created.attrs)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_import_reads_without_mutating() {
    let fake = FakePlatform::with_defaults();
    fake.respond("GET", &format!("/v2/organizations/{}", ORG), 200, acme());
    let provider = provider(&fake).await;

    let imported = provider.import("cloudfoundry_org", ORG).await.unwrap();

    assert_eq!(imported.id, ORG);
    assert_eq!(imported.attrs["name"], "acme");
    assert_eq!(imported.attrs["quota"], QUOTA);
    assert!(fake.mutating_requests().is_empty());
}

#[tokio::test]
async fn test_role_import_rejects_malformed_key() {
    let fake = FakePlatform::with_defaults();
    let provider = provider(&fake).await;

    let err = provider
        .import("cloudfoundry_org_role", "not-a-key")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidImportId { .. }), "{}", err);
}

fn service_instance(state: &str, description: &str) -> Value {
    entity(
        SERVICE_INSTANCE,
        json!({
            "name": "db",
            "space_guid": SPACE,
            "last_operation": { "type": "delete", "state": state, "description": description },
        }),
    )
}

#[tokio::test]
async fn test_async_service_instance_delete_waits() {
    let fake = FakePlatform::with_defaults();
    let path = format!("/v2/service_instances/{}", SERVICE_INSTANCE);
    fake.respond("DELETE", &path, 202, service_instance("in progress", ""));
    fake.respond("GET", &path, 200, service_instance("in progress", ""));
    fake.respond("GET", &path, 200, service_instance("succeeded", ""));
    let provider = provider(&fake).await;

    provider
        .delete(
            "cloudfoundry_service_instance",
            SERVICE_INSTANCE,
            &attrs(json!({ "name": "db", "space": SPACE })),
        )
        .await
        .unwrap();
    assert_eq!(fake.count("GET", &path), 2);
}

#[tokio::test]
async fn test_failed_service_instance_delete_reports_broker_message() {
    let fake = FakePlatform::with_defaults();
    let path = format!("/v2/service_instances/{}", SERVICE_INSTANCE);
    fake.respond("DELETE", &path, 202, service_instance("in progress", ""));
    fake.respond("GET", &path, 200, service_instance("failed", "binding exists"));
    let provider = provider(&fake).await;

    let err = provider
        .delete(
            "cloudfoundry_service_instance",
            SERVICE_INSTANCE,
            &attrs(json!({ "name": "db", "space": SPACE })),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "JobFailed");
    assert!(err.to_string().contains("binding exists"), "{}", err);
}

#[tokio::test]
async fn test_org_data_source_keeps_lookup_name() {
    let fake = FakePlatform::with_defaults();
    fake.respond("GET", "/v2/organizations", 200, page(vec![acme()]));
    let provider = provider(&fake).await;

    let data = provider
        .read_data_source("cloudfoundry_org", &attrs(json!({ "name": "acme" })))
        .await
        .unwrap();

    assert_eq!(data.id, ORG);
    assert_eq!(data.attrs["name"], "acme");
    assert_eq!(data.attrs["quota"], QUOTA);
}

#[tokio::test]
async fn test_missing_data_source_entity_is_not_found() {
    let fake = FakePlatform::with_defaults();
    fake.respond("GET", "/v2/stacks", 200, page(Vec::new()));
    let provider = provider(&fake).await;

    let err = provider
        .read_data_source("cloudfoundry_stack", &attrs(json!({ "name": "cflinuxfs9" })))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_oversized_memory_is_rejected_before_any_call() {
    let fake = FakePlatform::with_defaults();
    let provider = provider(&fake).await;

    let config = attrs(json!({ "name": "web", "space": SPACE, "memory": "9999999999999T" }));
    let err = provider
        .validate_resource_config("cloudfoundry_app", &config)
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidConfig(ref m) if m.contains("memory")), "{}", err);

    let err = provider.create("cloudfoundry_app", &config).await.unwrap_err();
    assert_eq!(err.kind(), "InvalidConfig");
    assert!(fake.mutating_requests().is_empty());
}

const NEW_APP: &str = "b2c3d4e5-f6a7-4b8c-9d0e-1f2a3b4c5d07";

#[tokio::test]
async fn test_blue_green_replaces_running_app() {
    let fake = FakePlatform::with_defaults();
    let old_path = format!("/v2/apps/{}", APP);
    let new_path = format!("/v2/apps/{}", NEW_APP);
    let fresh = entity(
        NEW_APP,
        json!({
            "name": "web",
            "space_guid": SPACE,
            "instances": 1,
            "memory": 256,
            "disk_quota": 1024,
            "health_check_type": "port",
            "state": "STARTED",
            "package_state": "STAGED",
        }),
    );
    fake.respond("PUT", &old_path, 201, web(128));
    fake.respond("POST", "/v2/apps", 201, fresh.clone());
    fake.respond("POST", &format!("{}/copy_bits", new_path), 201, json!({}));
    fake.respond("PUT", &new_path, 201, fresh.clone());
    fake.respond("GET", &new_path, 200, fresh);
    fake.respond(
        "GET",
        &format!("{}/instances", new_path),
        200,
        json!({ "0": { "state": "RUNNING" } }),
    );
    fake.respond_raw("DELETE", &old_path, RawResponse::new(204, Vec::new()));
    let provider = provider(&fake).await;

    let mut state = web_state(128);
    state["stopped"] = json!(false);
    state["strategy"] = json!("blue-green");
    let config = attrs(json!({
        "name": "web",
        "space": SPACE,
        "memory": 256,
        "strategy": "blue-green",
    }));
    let updated = provider
        .update("cloudfoundry_app", APP, &attrs(state), &config)
        .await
        .unwrap();

    assert_eq!(updated.id, NEW_APP);
    assert_eq!(updated.attrs["memory"], 256);
    assert_eq!(updated.attrs["strategy"], "blue-green");

    let mutations: Vec<(String, String)> = fake
        .mutating_requests()
        .into_iter()
        .map(|r| (r.method.to_string(), r.url.trim_start_matches("https://api.example.com").to_string()))
        .collect();
    let expected = [
        ("PUT", old_path.clone()),
        ("POST", "/v2/apps".to_string()),
        ("POST", format!("{}/copy_bits", new_path)),
        ("PUT", new_path.clone()),
        ("PUT", old_path.clone()),
        ("DELETE", old_path.clone()),
    ];
    assert_eq!(
        mutations,
        expected
            .iter()
            .map(|(m, u)| (m.to_string(), u.clone()))
            .collect::<Vec<_>>()
    );

    let renames = fake.requests_to("PUT", &old_path);
    assert_eq!(json_body(&renames[0].body), json!({ "name": "web-venerable" }));
    assert_eq!(json_body(&renames[1].body), json!({ "state": "STOPPED" }));
    let created = fake.requests_to("POST", "/v2/apps");
    assert_eq!(created[0].url, "https://api.example.com/v2/apps");
    assert_eq!(json_body(&created[0].body)["memory"], 256);
    assert_eq!(json_body(&created[0].body)["state"], "STOPPED");
}

#[tokio::test]
async fn test_blue_green_failure_restores_old_app() {
    let fake = FakePlatform::with_defaults();
    let old_path = format!("/v2/apps/{}", APP);
    let new_path = format!("/v2/apps/{}", NEW_APP);
    fake.respond("PUT", &old_path, 201, web(128));
    fake.respond("POST", "/v2/apps", 201, entity(NEW_APP, json!({ "name": "web" })));
    fake.respond(
        "POST",
        &format!("{}/copy_bits", new_path),
        400,
        json!({ "code": 10008, "description": "no package", "error_code": "CF-UnprocessableEntity" }),
    );
    fake.respond_raw("DELETE", &new_path, RawResponse::new(204, Vec::new()));
    let provider = provider(&fake).await;

    let mut state = web_state(128);
    state["stopped"] = json!(false);
    let config = attrs(json!({
        "name": "web",
        "space": SPACE,
        "memory": 256,
        "strategy": "blue-green",
    }));
    let err = provider
        .update("cloudfoundry_app", APP, &attrs(state), &config)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no package"), "{}", err);

    assert_eq!(fake.count("DELETE", &new_path), 1);
    assert_eq!(fake.count("DELETE", &old_path), 0);
    let renames = fake.requests_to("PUT", &old_path);
    assert_eq!(json_body(&renames[0].body), json!({ "name": "web-venerable" }));
    assert_eq!(json_body(&renames[1].body), json!({ "name": "web" }));
}

const PLAN: &str = "d4e5f6a7-b8c9-4d0e-8f1a-2b3c4d5e6f08";
const VISIBILITY: &str = "e5f6a7b8-c9d0-4e1f-9a2b-3c4d5e6f7a09";

#[tokio::test]
async fn test_plan_access_for_org_creates_visibility() {
    let fake = FakePlatform::with_defaults();
    let visibility = entity(
        VISIBILITY,
        json!({ "service_plan_guid": PLAN, "organization_guid": ORG }),
    );
    fake.respond("POST", "/v2/service_plan_visibilities", 201, visibility.clone());
    fake.respond(
        "GET",
        &format!("/v2/service_plan_visibilities/{}", VISIBILITY),
        200,
        visibility,
    );
    fake.respond_raw(
        "DELETE",
        &format!("/v2/service_plan_visibilities/{}", VISIBILITY),
        RawResponse::new(204, Vec::new()),
    );
    let provider = provider(&fake).await;

    let created = provider
        .create(
            "cloudfoundry_service_plan_access",
            &attrs(json!({ "plan": PLAN, "org": ORG })),
        )
        .await
        .unwrap();
    assert_eq!(created.id, VISIBILITY);
    assert_eq!(created.attrs["org"], ORG);
    let posts = fake.requests_to("POST", "/v2/service_plan_visibilities");
    assert_eq!(
        json_body(&posts[0].body),
        json!({ "service_plan_guid": PLAN, "organization_guid": ORG })
    );

    provider
        .delete("cloudfoundry_service_plan_access", &created.id, &created.attrs)
        .await
        .unwrap();
    assert_eq!(
        fake.count("DELETE", &format!("/v2/service_plan_visibilities/{}", VISIBILITY)),
        1
    );
}

#[tokio::test]
async fn test_public_plan_access_keeps_plan_on_delete() {
    let fake = FakePlatform::with_defaults();
    let plan_path = format!("/v2/service_plans/{}", PLAN);
    let plan = entity(PLAN, json!({ "name": "small", "public": true }));
    fake.respond("PUT", &plan_path, 201, plan.clone());
    fake.respond("GET", &plan_path, 200, plan);
    let provider = provider(&fake).await;

    let created = provider
        .create(
            "cloudfoundry_service_access",
            &attrs(json!({ "plan": PLAN, "public": true })),
        )
        .await
        .unwrap();
    assert_eq!(created.id, PLAN);
    assert_eq!(created.attrs["public"], true);
    assert_eq!(
        json_body(&fake.requests_to("PUT", &plan_path)[0].body),
        json!({ "public": true })
    );

    provider
        .delete("cloudfoundry_service_access", &created.id, &created.attrs)
        .await
        .unwrap();
    assert_eq!(fake.mutating_requests().len(), 1);
}

#[tokio::test]
async fn test_plan_access_rejects_org_with_public() {
    let fake = FakePlatform::with_defaults();
    let provider = provider(&fake).await;

    let err = provider
        .create(
            "cloudfoundry_service_plan_access",
            &attrs(json!({ "plan": PLAN, "org": ORG, "public": false })),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidConfig");
    assert!(fake.mutating_requests().is_empty());
}

#[tokio::test]
async fn test_sharing_reads_gone_once_unshared() {
    let fake = FakePlatform::with_defaults();
    let path = format!(
        "/v3/service_instances/{}/relationships/shared_spaces",
        SERVICE_INSTANCE
    );
    fake.respond("POST", &path, 200, json!({ "data": [{ "guid": OTHER_SPACE }] }));
    fake.respond("GET", &path, 200, json!({ "data": [{ "guid": OTHER_SPACE }] }));
    let provider = provider(&fake).await;

    let created = provider
        .create(
            "cloudfoundry_service_instance_sharing",
            &attrs(json!({ "service_instance": SERVICE_INSTANCE, "space": OTHER_SPACE })),
        )
        .await
        .unwrap();
    assert_eq!(created.id, format!("{}:{}", SERVICE_INSTANCE, OTHER_SPACE));

    fake.clear("GET", &path);
    fake.respond("GET", &path, 200, json!({ "data": [] }));
    assert!(provider
        .read("cloudfoundry_service_instance_sharing", &created.id, &created.attrs)
        .await
        .unwrap()
        .is_none());
}

const RUNNING_ASG: &str = "f6a7b8c9-d0e1-4f2a-8b3c-4d5e6f7a8b10";
const OPS_ASG: &str = "a7b8c9d0-e1f2-4a3b-9c4d-5e6f7a8b9c11";

#[tokio::test]
async fn test_space_asgs_leave_foreign_bindings() {
    let fake = FakePlatform::with_defaults();
    let bound = format!("/v2/spaces/{}/security_groups", SPACE);
    fake.respond(
        "GET",
        &bound,
        200,
        page(vec![
            entity(RUNNING_ASG, json!({ "name": "web" })),
            entity(OPS_ASG, json!({ "name": "ops" })),
        ]),
    );
    fake.respond("GET", &format!("/v2/spaces/{}/staging_security_groups", SPACE), 200, page(Vec::new()));
    let provider = provider(&fake).await;

    let state = attrs(json!({ "space": SPACE, "running_asgs": [RUNNING_ASG], "staging_asgs": [] }));
    let read = provider
        .read("cloudfoundry_space_asgs", SPACE, &state)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read.attrs["running_asgs"], json!([RUNNING_ASG]));

    provider
        .delete("cloudfoundry_space_asgs", SPACE, &state)
        .await
        .unwrap();
    let deletes: Vec<String> = fake.mutating_requests().into_iter().map(|r| r.url).collect();
    assert_eq!(
        deletes,
        vec![format!(
            "https://api.example.com/v2/security_groups/{}/spaces/{}",
            RUNNING_ASG, SPACE
        )]
    );
}

#[tokio::test]
async fn test_feature_flags_set_only_what_differs() {
    let fake = FakePlatform::with_defaults();
    fake.respond(
        "GET",
        "/v2/config/feature_flags",
        200,
        json!([
            { "name": "diego_docker", "enabled": false },
            { "name": "task_creation", "enabled": true },
            { "name": "app_scaling", "enabled": true },
        ]),
    );
    fake.respond("PUT", "/v2/config/feature_flags/diego_docker", 200, json!({}));
    let provider = provider(&fake).await;

    let created = provider
        .create(
            "cloudfoundry_feature_flags",
            &attrs(json!({ "feature_flags": { "diego_docker": "enabled", "task_creation": "enabled" } })),
        )
        .await
        .unwrap();
    assert_eq!(created.id, "config");
    let puts = fake.mutating_requests();
    assert_eq!(puts.len(), 1);
    assert_eq!(json_body(&puts[0].body), json!({ "enabled": true }));

    let imported = provider.import("cloudfoundry_feature_flags", "config").await.unwrap();
    assert_eq!(imported.attrs["feature_flags"]["app_scaling"], "enabled");
}

#[tokio::test]
async fn test_router_group_data_source() {
    let fake = FakePlatform::with_defaults();
    fake.respond(
        "GET",
        "/routing/v1/router_groups",
        200,
        json!([{ "guid": "rg-1", "name": "default-tcp", "type": "tcp", "reservable_ports": "1024-1033" }]),
    );
    let provider = provider(&fake).await;

    let data = provider
        .read_data_source("cloudfoundry_router_group", &attrs(json!({ "name": "default-tcp" })))
        .await
        .unwrap();
    assert_eq!(data.id, "rg-1");
    assert_eq!(data.attrs["type"], "tcp");
}

#[tokio::test]
async fn test_service_data_source_lists_plans() {
    let fake = FakePlatform::with_defaults();
    fake.respond(
        "GET",
        "/v2/services",
        200,
        page(vec![entity("svc-1", json!({ "label": "p-mysql", "description": "MySQL" }))]),
    );
    fake.respond(
        "GET",
        "/v2/service_plans",
        200,
        page(vec![
            entity("plan-1", json!({ "name": "db.small" })),
            entity("plan-2", json!({ "name": "large" })),
        ]),
    );
    let provider = provider(&fake).await;

    let data = provider
        .read_data_source("cloudfoundry_service", &attrs(json!({ "name": "p-mysql" })))
        .await
        .unwrap();
    assert_eq!(data.id, "svc-1");
    assert_eq!(
        data.attrs["service_plans"],
        json!({ "db_small": "plan-1", "large": "plan-2" })
    );
}

#[tokio::test]
async fn test_purge_config_purges_service_instance_recursively() {
    let fake = FakePlatform::with_defaults();
    let path = format!("/v2/service_instances/{}", SERVICE_INSTANCE);
    fake.respond_raw("DELETE", &path, RawResponse::new(204, Vec::new()));
    let config = ProviderConfig::from_value(&json!({
        "api_url": "https://api.example.com",
        "user": "admin",
        "password": "admin",
        "purge_when_deleted": true,
    }))
    .unwrap();
    let provider = Provider::with_session(Session::new(client_for(&fake).await, config));

    provider
        .delete(
            "cloudfoundry_service_instance",
            SERVICE_INSTANCE,
            &attrs(json!({ "name": "db", "space": SPACE })),
        )
        .await
        .unwrap();
    assert_eq!(
        fake.count("DELETE", &format!("{}?recursive=true&purge=true", path)),
        1
    );
}
