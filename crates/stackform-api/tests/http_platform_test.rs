#![allow(clippy::unwrap_used)]
// Integration tests for `HttpPlatform` using wiremock.

use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stackform_api::{
    Attributes, CreateRequest, Error, Filter, HttpPlatform, LookupQuery, Platform,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HttpPlatform) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let platform = HttpPlatform::with_client(reqwest::Client::new(), base_url, "us-east-1");
    (server, platform)
}

fn attrs(v: serde_json::Value) -> Attributes {
    v.as_object().unwrap().clone()
}

// ── Lookups ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_lookup_sends_filters() {
    let (server, platform) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/lookups/aws_subnets"))
        .and(header("X-Stackform-Region", "us-east-1"))
        .and(body_partial_json(json!({
            "filters": [{ "name": "tag:Tier", "values": ["private"] }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "id": "subnet-1", "availability_zone": "us-east-1a" },
                { "id": "subnet-2", "availability_zone": "us-east-1b" }
            ]
        })))
        .mount(&server)
        .await;

    let items = platform
        .lookup(&LookupQuery {
            kind: "aws_subnets".into(),
            filters: vec![Filter::new("tag:Tier", vec!["private".into()])],
        })
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["id"], "subnet-1");
}

// ── Create ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_sends_idempotency_key() {
    let (server, platform) = setup().await;
    let key = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/v1/resources/aws_ecs_cluster"))
        .and(header("Idempotency-Key", key.to_string().as_str()))
        .and(body_partial_json(json!({ "name": "llm", "attributes": { "name": "llm-cluster" } })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "cluster-1",
            "attributes": { "name": "llm-cluster", "arn": "arn:aws:ecs:us-east-1:1:cluster/llm-cluster" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let record = platform
        .create(&CreateRequest {
            kind: "aws_ecs_cluster".into(),
            name: "llm".into(),
            attributes: attrs(json!({ "name": "llm-cluster" })),
            idempotency_key: key,
        })
        .await
        .unwrap();

    assert_eq!(record.id, "cluster-1");
    assert_eq!(
        record.attributes["arn"],
        "arn:aws:ecs:us-east-1:1:cluster/llm-cluster"
    );
}

#[tokio::test]
async fn test_create_rejected_carries_code() {
    let (server, platform) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/resources/aws_lb"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "invalid_subnet",
            "message": "subnets must span two zones"
        })))
        .mount(&server)
        .await;

    let result = platform
        .create(&CreateRequest {
            kind: "aws_lb".into(),
            name: "shared".into(),
            attributes: Attributes::new(),
            idempotency_key: Uuid::new_v4(),
        })
        .await;

    match result {
        Err(ref e @ Error::Rejected { status: 400, .. }) => {
            assert_eq!(e.api_error_code(), Some("invalid_subnet"));
            assert!(!e.is_transient());
        }
        other => panic!("expected Rejected, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_create_response_keeps_body_out_of_error() {
    let (server, platform) = setup().await;

    // Truncated mid-object, after the echoed container environment.
    let body = r#"{"id":"td-1","attributes":{"container_definitions":"[{\"environment\":[{\"name\":\"WEBUI_SECRET_KEY\",\"value\":\"s3cr3t\"}]"#;
    Mock::given(method("POST"))
        .and(path("/v1/resources/aws_ecs_task_definition"))
        .respond_with(ResponseTemplate::new(201).set_body_raw(body, "application/json"))
        .mount(&server)
        .await;

    let err = platform
        .create(&CreateRequest {
            kind: "aws_ecs_task_definition".into(),
            name: "webui".into(),
            attributes: Attributes::new(),
            idempotency_key: Uuid::new_v4(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Deserialization { .. }), "{err:?}");
    let shown = format!("{err} {err:?}");
    assert!(!shown.contains("s3cr3t"), "{shown}");
    assert!(!shown.contains("WEBUI_SECRET_KEY"), "{shown}");
}

// ── Status mapping ──────────────────────────────────────────────────

#[tokio::test]
async fn test_rate_limit_reads_retry_after() {
    let (server, platform) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/resources/aws_iam_role/role-1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let result = platform.read("aws_iam_role", "role-1").await;
    assert!(
        matches!(result, Err(Error::RateLimited { retry_after_secs: 7 })),
        "expected RateLimited, got: {result:?}"
    );
}

#[tokio::test]
async fn test_not_yet_visible_is_transient() {
    let (server, platform) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/resources/aws_iam_instance_profile/ip-1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "not_yet_visible",
            "message": "role is still propagating"
        })))
        .mount(&server)
        .await;

    let err = platform
        .update("aws_iam_instance_profile", "ip-1", &Attributes::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotYetVisible { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_read_missing_is_none() {
    let (server, platform) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/resources/aws_lb/lb-9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "code": "not_found" })))
        .mount(&server)
        .await;

    assert!(platform.read("aws_lb", "lb-9").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_tolerates_already_gone() {
    let (server, platform) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/resources/aws_ecs_service/svc-1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    platform.delete("aws_ecs_service", "svc-1").await.unwrap();
}

#[tokio::test]
async fn test_ready_endpoint() {
    let (server, platform) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/resources/aws_autoscaling_group/asg-1/ready"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ready": true })))
        .mount(&server)
        .await;

    assert!(platform.is_ready("aws_autoscaling_group", "asg-1").await.unwrap());
}

#[tokio::test]
async fn test_api_key_sent_as_bearer() {
    let server = MockServer::start().await;
    let transport = stackform_api::TransportConfig {
        api_key: Some("sk-test".to_string().into()),
        ..Default::default()
    };
    let platform =
        HttpPlatform::new(Url::parse(&server.uri()).unwrap(), "us-east-1", &transport).unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/resources/aws_vpc/vpc-1"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(header_exists("User-Agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "vpc-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let rec = platform.read("aws_vpc", "vpc-1").await.unwrap().unwrap();
    assert_eq!(rec.id, "vpc-1");
    assert!(rec.attributes.is_empty());
}
