//! Shared resources for all extractions
//!
//! One HTTP client serves every concurrent run in the process. The default rate limiter here
//! backs executors that were not given a budget of their own, so their requests share one
//! budget rather than multiplying it by the number of queries in flight.

use once_cell::sync::{Lazy, OnceCell};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::extractor::config::{DEFAULT_REQUESTS_PER_MINUTE, RATE_LIMIT_WINDOW};
use crate::extractor::rate_limit::RateLimiter;

/// HTTP connect timeout (seconds)
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds); search pages with expanded changelogs can be slow
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Global HTTP client shared by the credential provider and every page source
pub static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    Arc::new(
        Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("jira-extractor/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                panic!("FATAL: Failed to build HTTP client: {}. Check system TLS configuration.", e);
            }),
    )
});

static GLOBAL_JIRA_RATE_LIMITER: OnceCell<Arc<RateLimiter>> = OnceCell::new();

/// Get the global HTTP client
pub fn global_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}

/// Get the process-wide Jira rate limiter
///
/// The first call fixes the budget; later calls return the same limiter whatever they pass.
pub fn global_jira_rate_limiter(requests_per_minute: Option<u32>) -> Arc<RateLimiter> {
    GLOBAL_JIRA_RATE_LIMITER
        .get_or_init(|| {
            let budget = requests_per_minute.unwrap_or(DEFAULT_REQUESTS_PER_MINUTE);
            Arc::new(RateLimiter::per_window(budget as usize, RATE_LIMIT_WINDOW))
        })
        .clone()
}
