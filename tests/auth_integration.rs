//! Authorization handshake tests against a mock HTTP endpoint.

use reverb_client::channels::{SendFrame, SocketIdSource};
use reverb_client::protocol::Envelope;
use reverb_client::{AuthClient, Authorizer, Channel, ChannelKind, ChannelState, ReverbError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn no_headers() -> Authorizer {
    Arc::new(|_, _| HashMap::new())
}

fn bearer(token: &str) -> Authorizer {
    let token = format!("Bearer {}", token);
    Arc::new(move |_, _| HashMap::from([("Authorization".to_string(), token.clone())]))
}

async fn mock_auth_endpoint(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/broadcasting/auth"))
        .respond_with(response)
        .mount(server)
        .await;
}

fn auth_client(server: &MockServer, authorizer: Authorizer) -> AuthClient {
    AuthClient::new(format!("{}/broadcasting/auth", server.uri()), authorizer)
}

#[tokio::test]
async fn test_successful_handshake() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/broadcasting/auth"))
        .and(header("Content-Type", "application/json"))
        .and(body_partial_json(json!({
            "socket_id": "42.17",
            "channel_name": "private-orders",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": "key:signature"})))
        .mount(&server)
        .await;

    let client = auth_client(&server, no_headers());
    let token = client
        .authorize("private-orders", "42.17", None)
        .await
        .unwrap();
    assert_eq!(token.auth, "key:signature");
    assert!(token.channel_data.is_none());
}

#[tokio::test]
async fn test_authorizer_headers_are_merged_in() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/broadcasting/auth"))
        .and(header("Authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": "key:signature"})))
        .mount(&server)
        .await;

    let client = auth_client(&server, bearer("secret-token"));
    assert!(client
        .authorize("private-orders", "42.17", None)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_channel_data_is_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/broadcasting/auth"))
        .and(body_partial_json(json!({
            "channel_name": "presence-room",
            "channel_data": "{\"user_id\":\"9\"}",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": "key:signature"})))
        .mount(&server)
        .await;

    let client = auth_client(&server, no_headers());
    let result = client
        .authorize("presence-room", "42.17", Some("{\"user_id\":\"9\"}"))
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_forbidden_carries_status_403() {
    let server = MockServer::start().await;
    mock_auth_endpoint(&server, ResponseTemplate::new(403)).await;

    let client = auth_client(&server, no_headers());
    let failure = client
        .authorize("private-orders", "42.17", None)
        .await
        .unwrap_err();
    assert_eq!(failure.status, Some(403));
}

#[tokio::test]
async fn test_server_error_carries_status() {
    let server = MockServer::start().await;
    mock_auth_endpoint(&server, ResponseTemplate::new(500)).await;

    let client = auth_client(&server, no_headers());
    let failure = client
        .authorize("private-orders", "42.17", None)
        .await
        .unwrap_err();
    assert_eq!(failure.status, Some(500));
}

#[tokio::test]
async fn test_malformed_body_has_no_status() {
    let server = MockServer::start().await;
    mock_auth_endpoint(
        &server,
        ResponseTemplate::new(200).set_body_string("not json at all"),
    )
    .await;

    let client = auth_client(&server, no_headers());
    let failure = client
        .authorize("private-orders", "42.17", None)
        .await
        .unwrap_err();
    assert_eq!(failure.status, None);
}

#[tokio::test]
async fn test_missing_auth_field_fails() {
    let server = MockServer::start().await;
    mock_auth_endpoint(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"something": "else"})),
    )
    .await;

    let client = auth_client(&server, no_headers());
    let failure = client
        .authorize("private-orders", "42.17", None)
        .await
        .unwrap_err();
    assert_eq!(failure.status, None);
}

#[tokio::test]
async fn test_unreachable_endpoint_has_no_status() {
    let client = AuthClient::new("http://127.0.0.1:1/broadcasting/auth", no_headers());
    let failure = client
        .authorize("private-orders", "42.17", None)
        .await
        .unwrap_err();
    assert_eq!(failure.status, None);
}

// Channel-level behavior around the handshake.

fn capture_sink() -> (SendFrame, Arc<parking_lot::Mutex<Vec<Envelope>>>) {
    let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sent_clone = sent.clone();
    let send: SendFrame = Arc::new(move |envelope: &Envelope| {
        sent_clone.lock().push(envelope.clone());
        true
    });
    (send, sent)
}

fn socket_id(id: &str) -> SocketIdSource {
    let id = id.to_string();
    Arc::new(move || Some(id.clone()))
}

#[tokio::test]
async fn test_private_subscribe_sends_auth_token() {
    let server = MockServer::start().await;
    mock_auth_endpoint(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"auth": "key:signature"})),
    )
    .await;

    let (send, sent) = capture_sink();
    let channel = Channel::new("private-orders", ChannelKind::Private, send, socket_id("42.17"))
        .unwrap()
        .with_auth(auth_client(&server, no_headers()));

    channel.subscribe().await.unwrap();

    let sent = sent.lock();
    assert_eq!(sent.len(), 1);
    let data = sent[0].data.as_ref().unwrap();
    assert_eq!(data["channel"], "private-orders");
    assert_eq!(data["auth"], "key:signature");
}

#[tokio::test]
async fn test_presence_subscribe_echoes_channel_data() {
    let server = MockServer::start().await;
    mock_auth_endpoint(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "auth": "key:signature",
            "channel_data": "{\"user_id\":\"9\",\"user_info\":{\"name\":\"Ada\"}}",
        })),
    )
    .await;

    let (send, sent) = capture_sink();
    let channel = Channel::new("presence-room", ChannelKind::Presence, send, socket_id("42.17"))
        .unwrap()
        .with_auth(auth_client(&server, no_headers()))
        .with_channel_data(json!({"user_id": "9"}));

    channel.subscribe().await.unwrap();

    let sent = sent.lock();
    let data = sent[0].data.as_ref().unwrap();
    assert_eq!(data["auth"], "key:signature");
    assert_eq!(
        data["channel_data"],
        "{\"user_id\":\"9\",\"user_info\":{\"name\":\"Ada\"}}"
    );
}

#[tokio::test]
async fn test_denied_subscribe_reverts_to_unsubscribed() {
    let server = MockServer::start().await;
    mock_auth_endpoint(&server, ResponseTemplate::new(403)).await;

    let (send, sent) = capture_sink();
    let channel = Channel::new("private-orders", ChannelKind::Private, send, socket_id("42.17"))
        .unwrap()
        .with_auth(auth_client(&server, no_headers()));

    let error = channel.subscribe().await.unwrap_err();
    assert!(matches!(
        error,
        ReverbError::AuthenticationError {
            status: Some(403),
            ..
        }
    ));
    assert_eq!(channel.state(), ChannelState::Unsubscribed);
    assert!(sent.lock().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_during_handshake_discards_result() {
    let server = MockServer::start().await;
    mock_auth_endpoint(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({"auth": "key:signature"}))
            .set_delay(Duration::from_millis(200)),
    )
    .await;

    let (send, sent) = capture_sink();
    let channel = Arc::new(
        Channel::new("private-orders", ChannelKind::Private, send, socket_id("42.17"))
            .unwrap()
            .with_auth(auth_client(&server, no_headers())),
    );

    let subscriber = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.subscribe().await })
    };

    // Let the handshake get in flight, then pull the rug.
    tokio::time::sleep(Duration::from_millis(50)).await;
    channel.unsubscribe().unwrap();

    // The stale result is discarded: no error and no subscribe frame.
    subscriber.await.unwrap().unwrap();
    let sent = sent.lock();
    assert!(sent.iter().all(|e| e.event != "pusher:subscribe"));
}
