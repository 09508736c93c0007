//! Retry policy tests.

use knock_client::retry::{FailureKind, classify};
use knock_client::{Error, RequestSpec, ResponseStatus};
use knock_tests::mock::MockServer;
use knock_tests::raw::{Behavior, RawServer};
use knock_tests::{create_recording_client, create_test_client, unreachable_host};
use serde_json::json;

#[tokio::test]
async fn test_server_error_retried_three_times() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let (client, recorder) =
        create_recording_client(&server.url()).expect("Failed to create client");
    server.respond_status_times(503, 10);

    let resp = client.make_request(RequestSpec::get("/v1/flaky")).await;

    assert_eq!(server.request_count(), 4);
    assert_eq!(resp.status_code, ResponseStatus::Error);
    assert_eq!(resp.status, 500);
    assert!(resp.body.is_none());
    assert!(matches!(resp.error, Some(Error::Status { status: 503, .. })));
    assert_eq!(recorder.failures().len(), 1);
}

#[tokio::test]
async fn test_server_error_recovers() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = create_test_client(&server.url(), None).expect("Failed to create client");
    server.respond_status_times(502, 2);
    server.respond_json(200, json!({"ok": true}));

    let resp = client.make_request(RequestSpec::get("/v1/flaky")).await;

    assert_eq!(server.request_count(), 3);
    assert_eq!(resp.status_code, ResponseStatus::Ok);
    assert_eq!(resp.status, 200);
}

#[tokio::test]
async fn test_rate_limited_retried() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = create_test_client(&server.url(), None).expect("Failed to create client");
    server.respond_status_times(429, 1);
    server.respond_json(200, json!({"ok": true}));

    let resp = client.make_request(RequestSpec::get("/v1/limited")).await;

    assert_eq!(server.request_count(), 2);
    assert!(resp.is_ok());
}

#[tokio::test]
async fn test_not_found_never_retried() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = create_test_client(&server.url(), None).expect("Failed to create client");
    server.respond_status_times(404, 4);

    let resp = client.make_request(RequestSpec::get("/v1/missing")).await;

    assert_eq!(server.request_count(), 1);
    assert_eq!(resp.status, 500);
    assert!(matches!(resp.error, Some(Error::Status { status: 404, .. })));
}

#[tokio::test]
async fn test_bad_request_never_retried() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = create_test_client(&server.url(), None).expect("Failed to create client");
    server.respond_status_times(400, 4);

    client
        .make_request(RequestSpec::post("/v1/users/user_1").json(json!({"name": 1})))
        .await;

    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn test_accepted_server_error_not_retried() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = create_test_client(&server.url(), None).expect("Failed to create client");
    server.respond_status_times(503, 4);

    let resp = client
        .make_request(RequestSpec::get("/v1/flaky").validate_status(|status| status < 600))
        .await;

    assert_eq!(server.request_count(), 1);
    assert_eq!(resp.status_code, ResponseStatus::Error);
    assert_eq!(resp.status, 503);
    assert!(resp.error.is_none());
}

#[tokio::test]
async fn test_network_error_retried_then_reported() {
    let host = unreachable_host().await.expect("Failed to reserve port");
    let (client, recorder) = create_recording_client(&host).expect("Failed to create client");

    let resp = client.make_request(RequestSpec::get("/v1/ping")).await;

    assert_eq!(resp.status_code, ResponseStatus::Error);
    assert_eq!(resp.status, 500);
    assert!(resp.body.is_none());
    let error = resp.error.expect("error should be set");
    assert!(matches!(error, Error::Http(_)));
    assert_eq!(classify(&error), FailureKind::Network);
    assert_eq!(recorder.failures().len(), 1);
}

#[tokio::test]
async fn test_connection_dropped_before_response_retried() {
    let server = RawServer::start(Behavior::Hangup)
        .await
        .expect("Failed to start raw server");
    let (client, recorder) =
        create_recording_client(server.url()).expect("Failed to create client");

    let resp = client.make_request(RequestSpec::get("/v1/ping")).await;

    assert_eq!(server.accepted(), 4);
    assert_eq!(resp.status_code, ResponseStatus::Error);
    assert_eq!(resp.status, 500);
    assert!(resp.body.is_none());
    let error = resp.error.expect("error should be set");
    assert_eq!(classify(&error), FailureKind::Network);
    assert_eq!(recorder.failures().len(), 1);
}

#[tokio::test]
async fn test_truncated_body_retried() {
    let server = RawServer::start(Behavior::TruncatedBody)
        .await
        .expect("Failed to start raw server");
    let (client, recorder) =
        create_recording_client(server.url()).expect("Failed to create client");

    let resp = client.make_request(RequestSpec::get("/v1/ping")).await;

    assert_eq!(server.accepted(), 4);
    assert_eq!(resp.status_code, ResponseStatus::Error);
    assert_eq!(resp.status, 500);
    assert!(resp.body.is_none());
    let error = resp.error.expect("error should be set");
    assert!(matches!(error, Error::Http(_)));
    assert_eq!(classify(&error), FailureKind::Network);
    assert_eq!(recorder.failures().len(), 1);
}
