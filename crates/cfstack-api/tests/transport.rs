//! Transport scenarios against the scripted platform

use cfstack_api::pagination::{collect_all, v2_stream};
use cfstack_api::testing::{FakePlatform, client_for};
use cfstack_api::{ApiError, Request, V2};
use serde_json::{Value, json};

fn token(n: u32) -> Value {
    json!({
        "access_token": format!("access-{}", n),
        "refresh_token": format!("refresh-{}", n),
        "expires_in": 3600,
    })
}

#[tokio::test]
async fn test_401_refreshes_once_and_retransmits() {
    let fake = FakePlatform::new();
    fake.respond("POST", "/oauth/token", 200, token(1));
    fake.respond("POST", "/oauth/token", 200, token(2));
    fake.respond(
        "GET",
        "/v2/organizations/o1",
        401,
        json!({"code": 1000, "error_code": "CF-InvalidAuthToken", "description": "Invalid Auth Token"}),
    );
    fake.respond(
        "GET",
        "/v2/organizations/o1",
        200,
        json!({"metadata": {"guid": "o1"}, "entity": {"name": "acme"}}),
    );
    let client = client_for(&fake).await;

    let org: V2<Value> = client.get_json("/v2/organizations/o1").await.unwrap();
    assert_eq!(org.guid(), "o1");

    let calls = fake.requests_to("GET", "/v2/organizations/o1");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].header("authorization"), Some("bearer access-1"));
    assert_eq!(calls[1].header("authorization"), Some("bearer access-2"));
    assert_eq!(fake.count("POST", "/oauth/token"), 1);
}

#[tokio::test]
async fn test_second_401_is_not_retried() {
    let fake = FakePlatform::new();
    fake.respond("POST", "/oauth/token", 200, token(1));
    fake.respond("POST", "/oauth/token", 200, token(2));
    fake.respond(
        "GET",
        "/v2/organizations/o1",
        401,
        json!({"code": 1000, "error_code": "CF-InvalidAuthToken", "description": "Invalid Auth Token"}),
    );
    let client = client_for(&fake).await;

    let err = client.send(Request::get("/v2/organizations/o1")).await.unwrap_err();
    assert_eq!(
        err.platform_kind(),
        Some(cfstack_api::PlatformErrorKind::NotAuthenticated)
    );
    assert_eq!(fake.count("GET", "/v2/organizations/o1"), 2);
}

#[tokio::test]
async fn test_failed_refresh_is_unauthenticated() {
    let fake = FakePlatform::new();
    fake.respond("POST", "/oauth/token", 200, token(1));
    fake.respond(
        "POST",
        "/oauth/token",
        400,
        json!({"error": "invalid_token", "error_description": "Invalid refresh token (expired)"}),
    );
    fake.respond(
        "GET",
        "/v2/organizations/o1",
        401,
        json!({"code": 1000, "error_code": "CF-InvalidAuthToken", "description": "Invalid Auth Token"}),
    );
    let client = client_for(&fake).await;

    let err = client.send(Request::get("/v2/organizations/o1")).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated(_)), "got {err}");
    assert_eq!(fake.count("GET", "/v2/organizations/o1"), 1);
}

#[tokio::test]
async fn test_pagination_yields_every_entity_once() {
    let fake = FakePlatform::with_defaults();
    let page = |from: usize, to: usize, next: Option<&str>| {
        let resources: Vec<Value> = (from..to)
            .map(|i| json!({"metadata": {"guid": format!("s{i}")}, "entity": {"name": format!("space-{i}")}}))
            .collect();
        json!({"total_results": 7, "next_url": next, "resources": resources})
    };
    fake.respond("GET", "/v2/spaces", 200, page(0, 3, Some("/v2/spaces?page=2")));
    fake.respond("GET", "/v2/spaces?page=2", 200, page(3, 6, Some("/v2/spaces?page=3")));
    fake.respond("GET", "/v2/spaces?page=3", 200, page(6, 7, None));
    let client = client_for(&fake).await;

    let spaces: Vec<V2<Value>> = collect_all(v2_stream(&client, Request::get("/v2/spaces")))
        .await
        .unwrap();
    let guids: Vec<&str> = spaces.iter().map(|s| s.guid()).collect();
    assert_eq!(guids, vec!["s0", "s1", "s2", "s3", "s4", "s5", "s6"]);
}

#[tokio::test]
async fn test_connection_failure_is_retried() {
    let fake = FakePlatform::with_defaults();
    fake.fail_transport("GET", "/v2/info", true);
    fake.respond("GET", "/v2/info", 200, json!({"name": "cf"}));
    let client = client_for(&fake).await;

    let info = cfstack_api::resources::info::get(&client).await.unwrap();
    assert_eq!(info.name, "cf");
    assert_eq!(fake.count("GET", "/v2/info"), 2);
}
