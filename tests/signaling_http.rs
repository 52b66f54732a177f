//! HTTP signaling tests
//!
//! Token fetch and SDP exchange against a mock realtime service.

mod fixtures;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aime_realtime::core::realtime::{
    ConnectionState, EphemeralCredential, HttpSignaling, RealtimeConfig, RealtimeModel, RealtimeSession,
    SessionDeps, SessionError, SignalingService,
};
use aime_realtime::core::tools::ToolBackends;
use fixtures::*;

const OFFER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=offer\r\n";
const ANSWER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=answer\r\n";

fn signaling(server: &MockServer) -> HttpSignaling {
    HttpSignaling::new(&server.uri(), RealtimeModel::default(), Duration::from_secs(5)).unwrap()
}

async fn mount_token(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_token_object_form() {
    let server = MockServer::start().await;
    mount_token(&server, json!({"client_secret": {"value": "ek_abc", "expires_at": 1700000000}})).await;

    let credential = signaling(&server).fetch_credential().await.unwrap();
    assert_eq!(credential.expose(), "ek_abc");
}

#[tokio::test]
async fn test_token_string_form() {
    let server = MockServer::start().await;
    mount_token(&server, json!({"client_secret": "ek_plain"})).await;

    let credential = signaling(&server).fetch_credential().await.unwrap();
    assert_eq!(credential.expose(), "ek_plain");
}

#[tokio::test]
async fn test_token_missing_secret() {
    let server = MockServer::start().await;
    mount_token(&server, json!({"id": "sess_1"})).await;

    let err = signaling(&server).fetch_credential().await.unwrap_err();
    assert!(matches!(err, SessionError::Credential(ref m) if m.contains("invalid token format")));
}

#[tokio::test]
async fn test_token_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = signaling(&server).fetch_credential().await.unwrap_err();
    assert_eq!(err, SessionError::Credential("failed to fetch token: 503".to_string()));
}

#[tokio::test]
async fn test_sdp_exchange_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/realtime"))
        .and(query_param("model", "gpt-4o-realtime-preview-2024-12-17"))
        .and(header("authorization", "Bearer ek_abc"))
        .and(header("content-type", "application/sdp"))
        .and(body_string(OFFER))
        .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER))
        .expect(1)
        .mount(&server)
        .await;

    let answer = signaling(&server)
        .exchange_description(OFFER, &EphemeralCredential::new("ek_abc"))
        .await
        .unwrap();
    assert_eq!(answer, ANSWER);
}

#[tokio::test]
async fn test_sdp_exchange_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/realtime"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid ephemeral key"))
        .mount(&server)
        .await;

    let err = signaling(&server)
        .exchange_description(OFFER, &EphemeralCredential::new("ek_stale"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SessionError::Negotiation {
            status: 401,
            body: "invalid ephemeral key".to_string()
        }
    );
}

#[tokio::test]
async fn test_unreachable_service() {
    let signaling = HttpSignaling::new(UNREACHABLE, RealtimeModel::default(), Duration::from_secs(2)).unwrap();
    assert!(matches!(
        signaling.fetch_credential().await,
        Err(SessionError::Credential(_))
    ));
}

#[tokio::test]
async fn test_session_connects_over_http_signaling() {
    let server = MockServer::start().await;
    mount_token(&server, json!({"client_secret": {"value": "ek_live"}})).await;
    Mock::given(method("POST"))
        .and(path("/realtime"))
        .and(header("authorization", "Bearer ek_live"))
        .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER))
        .expect(1)
        .mount(&server)
        .await;

    let transports = Arc::new(FakeTransportFactory::new());
    let capture = Arc::new(FakeCapture::new());
    let config = RealtimeConfig {
        api_base_url: server.uri(),
        ..Default::default()
    };
    let tools = ToolBackends::new(UNREACHABLE, UNREACHABLE, Duration::from_secs(2)).unwrap();
    let session =
        RealtimeSession::spawn(config, tools, SessionDeps::new(transports.clone(), capture.clone())).unwrap();

    assert!(session.start().await.unwrap());
    wait_for_status(&session, ConnectionState::Connected).await;
    assert_eq!(transports.latest().count_sent("session.update"), 1);

    session.shutdown().await.unwrap();
    assert_eq!(capture.live_tracks(), 0);
}

#[tokio::test]
async fn test_session_token_failure_sets_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let transports = Arc::new(FakeTransportFactory::new());
    let config = RealtimeConfig {
        api_base_url: server.uri(),
        ..Default::default()
    };
    let tools = ToolBackends::new(UNREACHABLE, UNREACHABLE, Duration::from_secs(2)).unwrap();
    let session = RealtimeSession::spawn(
        config,
        tools,
        SessionDeps::new(transports.clone(), Arc::new(FakeCapture::new())),
    )
    .unwrap();

    assert!(session.start().await.unwrap());
    wait_for_status(&session, ConnectionState::Error).await;
    assert_eq!(transports.created(), 0);
}
