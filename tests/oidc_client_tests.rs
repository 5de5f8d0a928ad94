mod support;

use chrono::{Duration, Utc};
use serde_json::json;
use ssobroker::auth::oidc::{ClientRegistration, OidcClient};
use ssobroker::auth::{DeviceAuthorizationApi, TokenPoll};
use ssobroker::error::{BrokerError, FlowStage};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::device_context;

fn client(server: &MockServer) -> OidcClient {
    OidcClient::new(reqwest::Client::new(), server.uri())
}

fn registration() -> ClientRegistration {
    ClientRegistration {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        expires_at: None,
    }
}

async fn token_response(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_partial_json(json!({
            "grantType": "urn:ietf:params:oauth:grant-type:device_code",
            "deviceCode": "device-code"
        })))
        .respond_with(template)
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn register_client_parses_registration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/client/register"))
        .and(header("accept", "application/json"))
        .and(body_partial_json(json!({
            "clientName": "ssobroker",
            "clientType": "public"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "clientId": "client-id",
            "clientSecret": "client-secret",
            "clientIdIssuedAt": 1_700_000_000,
            "clientSecretExpiresAt": 1_707_776_000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registration = client(&server).register_client("ssobroker").await.unwrap();

    assert_eq!(registration.client_id, "client-id");
    assert_eq!(registration.client_secret, "client-secret");
    assert_eq!(
        registration.expires_at.map(|t| t.timestamp()),
        Some(1_707_776_000)
    );
}

#[tokio::test]
async fn start_device_authorization_returns_user_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/device_authorization"))
        .and(body_partial_json(json!({
            "clientId": "client-id",
            "startUrl": "https://example.awsapps.com/start"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "deviceCode": "device-code",
            "userCode": "ABCD-EFGH",
            "verificationUri": "https://device.sso.us-east-1.amazonaws.com/",
            "verificationUriComplete": "https://device.sso.us-east-1.amazonaws.com/?user_code=ABCD-EFGH",
            "expiresIn": 600,
            "interval": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let authorization = client(&server)
        .start_device_authorization(&registration(), "https://example.awsapps.com/start")
        .await
        .unwrap();

    assert_eq!(authorization.user_code, "ABCD-EFGH");
    assert_eq!(authorization.expires_in, 600);
    assert_eq!(authorization.interval, Some(1));
}

#[tokio::test]
async fn start_device_authorization_rejects_bad_start_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/device_authorization"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_request",
            "error_description": "Invalid start url"
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .start_device_authorization(&registration(), "https://nope")
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::Validation(ref msg) if msg == "Invalid start url"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn create_token_returns_issued_grant() {
    let server = MockServer::start().await;
    token_response(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "access",
            "tokenType": "Bearer",
            "expiresIn": 28800,
            "refreshToken": "refresh"
        })),
    )
    .await;

    let context = device_context(Utc::now() + Duration::minutes(10), 5);
    let poll = client(&server).create_token(&context).await.unwrap();

    match poll {
        TokenPoll::Issued(grant) => {
            assert_eq!(grant.access_token, "access");
            assert_eq!(grant.expires_in, 28800);
            assert_eq!(grant.refresh_token.as_deref(), Some("refresh"));
        }
        other => panic!("expected issued grant, got {other:?}"),
    }
}

#[tokio::test]
async fn create_token_maps_pending_in_both_shapes() {
    for body in [
        json!({"error": "authorization_pending"}),
        json!({"__type": "AuthorizationPendingException", "message": "pending"}),
    ] {
        let server = MockServer::start().await;
        token_response(&server, ResponseTemplate::new(400).set_body_json(body)).await;

        let context = device_context(Utc::now() + Duration::minutes(10), 5);
        let poll = client(&server).create_token(&context).await.unwrap();
        assert_eq!(poll, TokenPoll::Pending);
    }
}

#[tokio::test]
async fn create_token_reads_error_type_header() {
    let server = MockServer::start().await;
    token_response(
        &server,
        ResponseTemplate::new(400)
            .insert_header("x-amzn-errortype", "SlowDownException:http://internal/")
            .set_body_json(json!({"message": "slow down"})),
    )
    .await;

    let context = device_context(Utc::now() + Duration::minutes(10), 5);
    let poll = client(&server).create_token(&context).await.unwrap();
    assert_eq!(poll, TokenPoll::SlowDown);
}

#[tokio::test]
async fn create_token_maps_denied_and_expired() {
    for (code, expected) in [
        ("access_denied", TokenPoll::Denied),
        ("expired_token", TokenPoll::Expired),
    ] {
        let server = MockServer::start().await;
        token_response(
            &server,
            ResponseTemplate::new(400).set_body_json(json!({"error": code})),
        )
        .await;

        let context = device_context(Utc::now() + Duration::minutes(10), 5);
        let poll = client(&server).create_token(&context).await.unwrap();
        assert_eq!(poll, expected);
    }
}

#[tokio::test]
async fn create_token_throttle_is_retryable_error() {
    let server = MockServer::start().await;
    token_response(
        &server,
        ResponseTemplate::new(429)
            .insert_header("retry-after", "3")
            .set_body_json(json!({"__type": "ThrottlingException"})),
    )
    .await;

    let context = device_context(Utc::now() + Duration::minutes(10), 5);
    let err = client(&server).create_token(&context).await.unwrap_err();

    assert!(matches!(err, BrokerError::RateLimited { .. }), "{err}");
    assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(3)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn create_token_server_error_is_retryable() {
    let server = MockServer::start().await;
    token_response(&server, ResponseTemplate::new(503).set_body_string("unavailable")).await;

    let context = device_context(Utc::now() + Duration::minutes(10), 5);
    let err = client(&server).create_token(&context).await.unwrap_err();

    assert!(matches!(err, BrokerError::Server { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn register_client_failure_keeps_registration_stage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/client/register"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "__type": "AccessDeniedException",
            "message": "not allowed"
        })))
        .mount(&server)
        .await;

    let err = client(&server).register_client("ssobroker").await.unwrap_err();

    assert_eq!(
        err.context().and_then(|c| c.stage),
        Some(FlowStage::Registration)
    );
}
