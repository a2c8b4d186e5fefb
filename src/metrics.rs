//! Operational metrics for extraction runs
//!
//! Counters and histograms for search requests, retries, limiter health and per-query
//! progress, recorded through the `metrics` facade. Nothing is exported unless
//! [`init_metrics`] installs the Prometheus endpoint; without a recorder every call is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: Lazy<Arc<RwLock<u64>>> = Lazy::new(|| Arc::new(RwLock::new(0)));

/// Metrics setup errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The Prometheus exporter could not be installed
    #[error("failed to install Prometheus exporter on {addr}: {message}")]
    Install {
        /// Requested listen address
        addr: SocketAddr,
        /// Underlying error
        message: String,
    },
}

/// Initialize metrics with a Prometheus scrape endpoint at `addr`
///
/// Idempotent; a second call is ignored.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install {
            addr,
            message: e.to_string(),
        })?;

    describe_counter!(
        "jira_requests_total",
        Unit::Count,
        "Total number of search requests sent to Jira"
    );
    describe_counter!(
        "jira_429_errors_total",
        Unit::Count,
        "Total number of 429 rate limit responses received"
    );
    describe_counter!("jira_retries_total", Unit::Count, "Total number of retry attempts");
    describe_histogram!(
        "jira_request_duration_seconds",
        Unit::Seconds,
        "Search request duration in seconds"
    );
    describe_histogram!(
        "jira_retry_backoff_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_counter!(
        "rate_limit_permits_acquired_total",
        Unit::Count,
        "Total number of rate limit permits acquired"
    );
    describe_gauge!(
        "rate_limit_permits_available",
        Unit::Count,
        "Currently available rate limit permits"
    );
    describe_histogram!(
        "rate_limit_queue_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for rate limit permits"
    );
    describe_counter!("extraction_pages_total", Unit::Count, "Pages persisted and checkpointed");
    describe_counter!("extraction_records_total", Unit::Count, "Records upserted into datasets");
    describe_counter!(
        "extraction_records_skipped_total",
        Unit::Count,
        "Records dropped by the skip schema policy"
    );
    describe_counter!(
        "extractions_completed_total",
        Unit::Count,
        "Total number of queries extracted to completion"
    );
    describe_counter!(
        "extractions_failed_total",
        Unit::Count,
        "Total number of failed extractions"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub async fn generate_correlation_id() -> String {
    let mut counter = CORRELATION_COUNTER.write().await;
    *counter += 1;
    format!("req-{:08x}", *counter)
}

/// Timing and outcome of one search request
pub struct HttpRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
}

impl HttpRequestMetrics {
    /// Start recording a request to `endpoint`
    pub async fn start(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id().await;

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            "Starting HTTP request metrics"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record a response with `status_code`
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "jira_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);
        histogram!(
            "jira_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            counter!("jira_429_errors_total", "endpoint" => self.endpoint.clone()).increment(1);
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                duration_ms = duration.as_millis(),
                "Rate limit error (429) recorded"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a request that failed before any status was received
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "jira_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
        )
        .increment(1);
        histogram!(
            "jira_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Correlation ID of this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record one retry and its backoff
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("jira_retries_total", "attempt" => attempt.to_string()).increment(1);
    histogram!("jira_retry_backoff_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Rate limiter metrics helper
pub struct RateLimiterMetrics {
    start_time: Option<Instant>,
}

impl Default for RateLimiterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterMetrics {
    /// Create a new rate limiter metrics instance
    pub fn new() -> Self {
        Self { start_time: None }
    }

    /// Start measuring queue wait time
    pub fn start_acquire(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Record successful permit acquisition
    pub fn record_acquired(&mut self) {
        if let Some(start) = self.start_time.take() {
            let wait_duration = start.elapsed();

            histogram!("rate_limit_queue_wait_seconds").record(wait_duration.as_secs_f64());
            counter!("rate_limit_permits_acquired_total").increment(1);

            if wait_duration.as_millis() > 100 {
                debug!(
                    wait_ms = wait_duration.as_millis(),
                    "Rate limit permit acquired after wait"
                );
            }
        }
    }

    /// Update available permits gauge
    pub fn update_available_permits(&self, available: usize) {
        gauge!("rate_limit_permits_available").set(available as f64);
    }
}

/// Per-query extraction metrics
pub struct ExtractionMetrics {
    query_hash: String,
    record_type: String,
    start_time: Instant,
}

impl ExtractionMetrics {
    /// Start tracking a query
    pub fn start(query_hash: impl Into<String>, record_type: impl Into<String>) -> Self {
        let query_hash = query_hash.into();
        let record_type = record_type.into();

        info!(
            query_hash = %query_hash,
            record_type = %record_type,
            "Extraction started"
        );

        Self {
            query_hash,
            record_type,
            start_time: Instant::now(),
        }
    }

    /// Record a committed page
    pub fn record_page(&self, written: u64, skipped: u64) {
        counter!("extraction_pages_total", "record_type" => self.record_type.clone()).increment(1);
        counter!("extraction_records_total", "record_type" => self.record_type.clone()).increment(written);
        if skipped > 0 {
            counter!(
                "extraction_records_skipped_total",
                "record_type" => self.record_type.clone(),
            )
            .increment(skipped);
        }
    }

    /// Record completion
    pub fn record_success(&self, records_written: u64) {
        let duration = self.start_time.elapsed();

        counter!(
            "extractions_completed_total",
            "record_type" => self.record_type.clone(),
        )
        .increment(1);

        info!(
            query_hash = %self.query_hash,
            record_type = %self.record_type,
            records_written = records_written,
            duration_secs = duration.as_secs(),
            "Extraction completed successfully"
        );
    }

    /// Record a failed extraction
    pub fn record_failure(&self, kind: &str, error: &str) {
        let duration = self.start_time.elapsed();

        counter!(
            "extractions_failed_total",
            "record_type" => self.record_type.clone(),
            "kind" => kind.to_string(),
        )
        .increment(1);

        error!(
            query_hash = %self.query_hash,
            record_type = %self.record_type,
            kind = %kind,
            error = %error,
            duration_secs = duration.as_secs(),
            "Extraction failed"
        );
    }
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
