//! Extraction configuration constants and backoff policy

use rand::Rng;
use std::time::Duration;

/// Maximum number of retries for a transient page failure.
/// 5 retries with exponential backoff ride out short outages (max total wait about a minute).
pub const MAX_RETRIES: u32 = 5;

/// Upper bound accepted for `--max-retries`
pub const MAX_RETRIES_LIMIT: u32 = 20;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Fraction of the exponential delay that may be added as random jitter
pub const JITTER_FRACTION: f64 = 0.25;

/// Default request budget per rate limit window
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 120;

/// Rate limit window length
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Default number of queries extracted concurrently
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Upper bound for concurrent queries
pub const MAX_CONCURRENCY: usize = 32;

/// Exponential backoff with bounded jitter
///
/// The delay for retry `n` is `initial * 2^n` plus up to `jitter * initial * 2^n`, capped at
/// `max`. Jitter never pushes a delay below the previous attempt's base, so successive
/// delays are non-decreasing until they reach the cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(INITIAL_BACKOFF_MS),
            max: Duration::from_millis(MAX_BACKOFF_MS),
            jitter: JITTER_FRACTION,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with explicit bounds
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: JITTER_FRACTION,
        }
    }

    /// Set the jitter fraction, clamped to `0.0..=1.0`
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Maximum delay
    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// Delay before retry `retry_count` (zero-based) using `random` in `0.0..1.0`
    pub fn delay_with(&self, retry_count: u32, random: f64) -> Duration {
        let base_ms = (self.initial.as_millis() as u64)
            .saturating_mul(2u64.saturating_pow(retry_count.min(32)));
        let jitter_ms = (base_ms as f64 * self.jitter * random.clamp(0.0, 1.0)) as u64;
        let delay_ms = base_ms
            .saturating_add(jitter_ms)
            .min(self.max.as_millis() as u64);
        Duration::from_millis(delay_ms)
    }

    /// Delay before retry `retry_count`, honoring a server-indicated wait when present
    pub fn delay_for(&self, retry_count: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(wait) => wait,
            None => self.delay_with(retry_count, rand::rng().random_range(0.0..1.0)),
        }
    }
}
