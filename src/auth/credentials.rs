//! Credentials file loading
//!
//! ```toml
//! [authentication]
//! personal_access_token = "..."
//! default_project_key = "DEMO"
//!
//! [service]
//! base_url = "https://jira.example.com"
//! session_ttl_secs = 3600
//! ```
//!
//! `JIRA_BASE_URL` and `JIRA_PAT` override the file values.

use super::{AuthError, DEFAULT_SESSION_TTL};
use reqwest::Url;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the service base URL
pub const ENV_BASE_URL: &str = "JIRA_BASE_URL";

/// Environment variable overriding the personal access token
pub const ENV_TOKEN: &str = "JIRA_PAT";

/// Access token whose `Debug` and `Display` output is redacted
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    /// Wrap a token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value, for building the authorization header only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

impl fmt::Display for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    authentication: AuthenticationSection,
    #[serde(default)]
    service: ServiceSection,
}

#[derive(Debug, Default, Deserialize)]
struct AuthenticationSection {
    personal_access_token: Option<String>,
    default_project_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceSection {
    base_url: Option<String>,
    session_ttl_secs: Option<u64>,
}

/// Validated credentials for one service instance
#[derive(Debug, Clone)]
pub struct Credentials {
    base_url: String,
    token: SecretToken,
    default_project_key: Option<String>,
    session_ttl: Duration,
}

impl Credentials {
    /// Build credentials from a base URL and token
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Missing`] for an empty token and [`AuthError::Malformed`] for a
    /// base URL that is not an absolute http(s) URL.
    pub fn new(base_url: &str, token: &str) -> Result<Self, AuthError> {
        Ok(Self {
            base_url: validate_base_url(base_url)?,
            token: validate_token(token)?,
            default_project_key: None,
            session_ttl: DEFAULT_SESSION_TTL,
        })
    }

    /// Load from a TOML file, then apply environment overrides
    ///
    /// With no path, credentials come from the environment alone.
    pub fn load(path: Option<&Path>) -> Result<Self, AuthError> {
        let file = match path {
            Some(path) => read_file(path)?,
            None => CredentialsFile::default(),
        };
        Self::from_parts(
            file,
            std::env::var(ENV_BASE_URL).ok(),
            std::env::var(ENV_TOKEN).ok(),
        )
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(content: &str) -> Result<Self, AuthError> {
        let file: CredentialsFile =
            toml::from_str(content).map_err(|e| AuthError::Malformed(e.to_string()))?;
        Self::from_parts(file, None, None)
    }

    fn from_parts(
        file: CredentialsFile,
        base_url_override: Option<String>,
        token_override: Option<String>,
    ) -> Result<Self, AuthError> {
        let base_url = base_url_override
            .filter(|v| !v.trim().is_empty())
            .or(file.service.base_url)
            .ok_or_else(|| {
                AuthError::Missing(format!(
                    "service base_url (set [service] base_url or {})",
                    ENV_BASE_URL
                ))
            })?;
        let token = token_override
            .filter(|v| !v.trim().is_empty())
            .or(file.authentication.personal_access_token)
            .ok_or_else(|| {
                AuthError::Missing(format!(
                    "personal access token (set [authentication] personal_access_token or {})",
                    ENV_TOKEN
                ))
            })?;

        let mut credentials = Self::new(&base_url, &token)?;
        credentials.default_project_key = file
            .authentication
            .default_project_key
            .map(|k| k.trim().to_uppercase())
            .filter(|k| !k.is_empty());
        if let Some(secs) = file.service.session_ttl_secs {
            if secs == 0 {
                return Err(AuthError::Malformed("session_ttl_secs must be positive".to_string()));
            }
            credentials.session_ttl = Duration::from_secs(secs);
        }
        Ok(credentials)
    }

    /// Replace the session lifetime
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Service base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Access token
    pub fn token(&self) -> &SecretToken {
        &self.token
    }

    /// Project used when a query names none
    pub fn default_project_key(&self) -> Option<&str> {
        self.default_project_key.as_deref()
    }

    /// Lifetime given to acquired sessions
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }
}

fn read_file(path: &Path) -> Result<CredentialsFile, AuthError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AuthError::Missing(format!("cannot read credentials file {}: {}", path.display(), e))
    })?;
    toml::from_str(&content).map_err(|e| {
        AuthError::Malformed(format!("invalid credentials file {}: {}", path.display(), e))
    })
}

fn validate_base_url(raw: &str) -> Result<String, AuthError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthError::Missing("service base_url is empty".to_string()));
    }
    let url = Url::parse(trimmed)
        .map_err(|e| AuthError::Malformed(format!("base_url '{}': {}", trimmed, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(AuthError::Malformed(format!(
            "base_url '{}' must be an absolute http(s) URL",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_token(raw: &str) -> Result<SecretToken, AuthError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AuthError::Missing("personal access token is empty".to_string()));
    }
    if trimmed.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(AuthError::Malformed(
            "personal access token contains whitespace or control characters".to_string(),
        ));
    }
    Ok(SecretToken::new(trimmed))
}
