//! Credential handling and authenticated sessions
//!
//! The [`CredentialProvider`] trait is the seam between the extraction engine and whatever
//! supplies a valid [`Session`]. [`TokenCredentialProvider`] is the production implementation:
//! it verifies a personal access token against the service before handing out a session.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt;
use std::time::Duration;

pub mod credentials;
pub mod token;

pub use credentials::{Credentials, SecretToken};
pub use token::TokenCredentialProvider;

/// Sessions are refreshed this long before they actually expire
pub const SESSION_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Default lifetime assigned to a token session
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Authentication errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// Required credential value is absent
    #[error("credentials missing: {0}")]
    Missing(String),

    /// Credential value is present but unusable
    #[error("credentials malformed: {0}")]
    Malformed(String),

    /// Service refused the credentials
    #[error("credentials rejected by service (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response excerpt
        message: String,
    },

    /// Handshake could not be completed
    #[error("authentication handshake failed: {0}")]
    Handshake(String),
}

/// Authenticated handle used by the transport for the duration of a run
///
/// The `Debug` output never includes the token.
#[derive(Clone)]
pub struct Session {
    base_url: String,
    token: SecretToken,
    account: Option<String>,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session valid for `ttl` from now
    pub fn new(base_url: impl Into<String>, token: SecretToken, ttl: Duration) -> Self {
        let acquired_at = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            account: None,
            acquired_at,
            expires_at: acquired_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Attach the account name reported by the handshake
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Override the expiry instant
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Service base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Bearer token
    pub fn token(&self) -> &SecretToken {
        &self.token
    }

    /// Account name, if the handshake reported one
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// When the session was acquired
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// When the session stops being valid
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the session expires within `margin` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = ChronoDuration::from_std(margin).unwrap_or(ChronoDuration::zero());
        now + margin >= self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .field("token", &self.token)
            .field("account", &self.account)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplier of authenticated sessions
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Validate the credentials and produce a fresh session
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when credentials are missing, malformed or rejected.
    async fn acquire(&self) -> Result<Session, AuthError>;

    /// Whether the session should be replaced before the next request
    fn is_expired(&self, session: &Session) -> bool {
        session.expires_within(Utc::now(), SESSION_REFRESH_MARGIN)
    }
}
