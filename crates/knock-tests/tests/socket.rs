//! Socket lifecycle tests.

use knock_client::protocol::{PHOENIX_TOPIC, events};
use knock_client::{ApiClient, ChannelState, ClientConfig, ConnectionState, SocketOptions};
use knock_tests::mock::MockServer;
use knock_tests::{TEST_API_KEY, create_test_client, eventually, init_tracing};
use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_connect_socket_sets_flag_on_open() {
    init_tracing();
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = create_test_client(&server.url(), None).expect("Failed to create client");

    assert!(!client.socket_connected());
    client.connect_socket().expect("Failed to start connect");

    assert!(eventually(WAIT, || client.socket_connected()).await);
    assert!(client.socket().is_connected());
    assert_eq!(server.socket_connects(), 1);
}

#[tokio::test]
async fn test_socket_params_sent() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client =
        create_test_client(&server.url(), Some("user-jwt")).expect("Failed to create client");

    client.connect_socket().expect("Failed to start connect");
    assert!(eventually(WAIT, || client.socket_connected()).await);

    let queries = server.socket_queries();
    assert_eq!(queries[0]["user_token"], "user-jwt");
    assert_eq!(queries[0]["api_key"], TEST_API_KEY);
    assert_eq!(queries[0]["vsn"], "2.0.0");
}

#[tokio::test]
async fn test_connect_socket_twice_connects_once() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = create_test_client(&server.url(), None).expect("Failed to create client");

    client.connect_socket().expect("Failed to start connect");
    client.connect_socket().expect("Failed to start connect");
    assert!(eventually(WAIT, || client.socket_connected()).await);
    client.connect_socket().expect("Failed to start connect");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.socket_connects(), 1);
}

#[tokio::test]
async fn test_disconnect_keeps_connected_flag() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = create_test_client(&server.url(), None).expect("Failed to create client");

    client.connect_socket().expect("Failed to start connect");
    assert!(eventually(WAIT, || client.socket_connected()).await);

    client.disconnect_socket();

    assert!(
        eventually(WAIT, || {
            client.socket().connection_state() == ConnectionState::Disconnected
        })
        .await
    );
    assert!(client.socket_connected());

    // The stale flag turns a second connect into a no-op.
    client.connect_socket().expect("Failed to start connect");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.socket_connects(), 1);
    assert!(!client.socket().is_connected());
}

#[tokio::test]
async fn test_socket_reconnects_directly_after_disconnect() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = create_test_client(&server.url(), None).expect("Failed to create client");
    let socket = client.socket();

    socket.connect().expect("Failed to start connect");
    assert!(eventually(WAIT, || socket.is_connected()).await);
    socket.disconnect();
    assert!(eventually(WAIT, || !socket.is_connected()).await);

    socket.connect().expect("Failed to start connect");
    assert!(eventually(WAIT, || server.socket_connects() == 2).await);
    assert!(eventually(WAIT, || socket.is_connected()).await);
}

#[tokio::test]
async fn test_open_signal_completes() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = create_test_client(&server.url(), None).expect("Failed to create client");

    let opened = client.socket().on_open();
    client.socket().connect().expect("Failed to start connect");

    let result = tokio::time::timeout(WAIT, opened.opened()).await;
    assert_eq!(result.ok(), Some(true));
}

#[tokio::test]
async fn test_reconnect_after_server_drop_rejoins_channels() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = create_test_client(&server.url(), None).expect("Failed to create client");
    client.connect_socket().expect("Failed to start connect");

    let mut channel = client.create_channel("feeds:feed_1:user_1", Some(json!({})));
    channel.join().await.expect("Failed to join");

    server.drop_sockets();

    assert!(eventually(WAIT, || server.socket_connects() == 2).await);
    assert!(eventually(WAIT, || channel.state() == ChannelState::Joined).await);

    let joins = server
        .received_frames()
        .into_iter()
        .filter(|f| f.event == events::JOIN)
        .count();
    assert_eq!(joins, 2);

    server.broadcast("feeds:feed_1:user_1", "new-message", json!({"id": "m2"}));
    let msg = tokio::time::timeout(WAIT, channel.recv())
        .await
        .expect("Timed out waiting for event")
        .expect("Channel closed");
    assert_eq!(msg.payload, json!({"id": "m2"}));
}

#[tokio::test]
async fn test_no_reconnect_when_disabled() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = ApiClient::builder(ClientConfig::new(server.url(), TEST_API_KEY))
        .socket_options(SocketOptions {
            reconnect: false,
            ..SocketOptions::default()
        })
        .build()
        .expect("Failed to create client");

    client.socket().connect().expect("Failed to start connect");
    assert!(eventually(WAIT, || client.socket().is_connected()).await);

    server.drop_sockets();

    assert!(eventually(WAIT, || !client.socket().is_connected()).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.socket_connects(), 1);
}

#[tokio::test]
async fn test_heartbeats_sent_and_answered() {
    let server = MockServer::start().await.expect("Failed to start mock");
    let client = ApiClient::builder(ClientConfig::new(server.url(), TEST_API_KEY))
        .socket_options(SocketOptions {
            heartbeat_interval: Duration::from_millis(50),
            ..SocketOptions::default()
        })
        .build()
        .expect("Failed to create client");

    client.connect_socket().expect("Failed to start connect");
    assert!(eventually(WAIT, || client.socket_connected()).await);

    let heartbeats = || {
        server
            .received_frames()
            .into_iter()
            .filter(|f| f.topic == PHOENIX_TOPIC && f.event == events::HEARTBEAT)
            .count()
    };
    assert!(eventually(WAIT, || heartbeats() >= 3).await);
    assert!(client.socket().is_connected());
    assert_eq!(server.socket_connects(), 1);
}
