//! Authentication handshake against a mock Jira server

use jira_extractor::auth::{AuthError, CredentialProvider, Credentials, TokenCredentialProvider};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer, token: &str) -> TokenCredentialProvider {
    let credentials = Credentials::new(&server.uri(), token).unwrap();
    TokenCredentialProvider::with_client(Arc::new(reqwest::Client::new()), credentials)
}

#[tokio::test]
async fn test_handshake_produces_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/myself"))
        .and(header("authorization", "Bearer good-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "jdoe",
            "displayName": "Jane Doe",
            "active": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, "good-token");
    let session = provider.acquire().await.unwrap();

    assert_eq!(session.account(), Some("jdoe"));
    assert_eq!(session.base_url(), server.uri());
    assert!(!provider.is_expired(&session));
    let lifetime = session.expires_at() - session.acquired_at();
    assert_eq!(lifetime.num_seconds(), 3600);
}

#[tokio::test]
async fn test_cloud_account_id_used_when_no_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/myself"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accountId": "5b10ac8d82e05b22cc7d4ef5"
        })))
        .mount(&server)
        .await;

    let session = provider(&server, "token").acquire().await.unwrap();
    assert_eq!(session.account(), Some("5b10ac8d82e05b22cc7d4ef5"));
}

#[tokio::test]
async fn test_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/myself"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let err = provider(&server, "revoked").acquire().await.unwrap_err();
    match err {
        AuthError::Rejected { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Unauthorized");
        }
        other => panic!("Expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_is_handshake_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/myself"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = provider(&server, "token").acquire().await.unwrap_err();
    assert!(matches!(err, AuthError::Handshake(_)));
}

#[test]
fn test_short_session_ttl_is_expired_immediately() {
    let credentials = Credentials::new("https://jira.example.com", "token")
        .unwrap()
        .with_session_ttl(Duration::from_secs(30));
    let provider = TokenCredentialProvider::new(credentials.clone());
    let session = jira_extractor::auth::Session::new(
        credentials.base_url(),
        credentials.token().clone(),
        credentials.session_ttl(),
    );
    // 30s lifetime is inside the 60s refresh margin.
    assert!(provider.is_expired(&session));
}
