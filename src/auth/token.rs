//! Personal access token provider

use super::{AuthError, CredentialProvider, Credentials, Session};
use crate::fetcher::shared_resources::global_http_client;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handshake endpoint, relative to the base URL
pub const MYSELF_ENDPOINT: &str = "/rest/api/2/myself";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MyselfResponse {
    name: Option<String>,
    account_id: Option<String>,
    display_name: Option<String>,
}

/// Credential provider backed by a personal access token
///
/// Every [`acquire`](CredentialProvider::acquire) performs a handshake against
/// `/rest/api/2/myself` so a revoked or mistyped token fails before any page is fetched.
pub struct TokenCredentialProvider {
    client: Arc<Client>,
    credentials: Credentials,
}

impl TokenCredentialProvider {
    /// Create a provider using the shared HTTP client
    pub fn new(credentials: Credentials) -> Self {
        Self::with_client(global_http_client(), credentials)
    }

    /// Create a provider with a specific HTTP client
    pub fn with_client(client: Arc<Client>, credentials: Credentials) -> Self {
        Self { client, credentials }
    }

    /// Credentials this provider authenticates with
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

#[async_trait]
impl CredentialProvider for TokenCredentialProvider {
    async fn acquire(&self) -> Result<Session, AuthError> {
        let url = format!("{}{}", self.credentials.base_url(), MYSELF_ENDPOINT);
        debug!(url = %url, "Performing authentication handshake");

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.credentials.token().expose())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthError::Handshake(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Credentials rejected during handshake");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: excerpt(&body),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Handshake(format!(
                "unexpected HTTP {} from {}: {}",
                status.as_u16(),
                MYSELF_ENDPOINT,
                excerpt(&body)
            )));
        }

        let myself: MyselfResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Handshake(format!("unreadable handshake response: {}", e)))?;

        let mut session = Session::new(
            self.credentials.base_url(),
            self.credentials.token().clone(),
            self.credentials.session_ttl(),
        );
        if let Some(account) = myself.name.or(myself.account_id).or(myself.display_name) {
            session = session.with_account(account);
        }

        info!(
            account = session.account().unwrap_or("unknown"),
            expires_at = %session.expires_at(),
            "Authenticated session acquired"
        );
        Ok(session)
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}
