//! Per-client request budget over a fixed one-minute window.
//!
//! Each client key owns a bucket `{window_start, count}`. A request in a
//! window that has run for a full minute starts a new window. Within a window
//! the first `limit` requests are allowed and the rest are rejected without
//! being counted.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ProviderSettings;

/// Length of one rate-limit window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request may proceed
    Allowed,

    /// Budget exhausted for this window
    Limited {
        /// Time until the client's window resets
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }
}

/// Request count for one client within its current window.
#[derive(Debug, Clone, Copy)]
struct RateLimitBucket {
    window_start: Instant,
    count: u32,
}

/// Fixed-window rate limiter keyed by client identity.
///
/// The limiter reads `rate_limit_enabled` and `rate_limit_per_minute` from the
/// settings snapshot passed to each call, so a settings reload takes effect
/// on the next request.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, RateLimitBucket>>,
}

impl RateLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and count one request for `client_key`.
    ///
    /// Always allowed, without touching any bucket, when rate limiting is
    /// disabled in `settings`.
    pub async fn allow(&self, client_key: &str, settings: &ProviderSettings) -> RateLimitDecision {
        if !settings.rate_limit_enabled {
            return RateLimitDecision::Allowed;
        }
        self.allow_at(client_key, settings.rate_limit_per_minute, Instant::now())
            .await
    }

    async fn allow_at(&self, client_key: &str, limit: u32, now: Instant) -> RateLimitDecision {
        let mut buckets = self.buckets.lock().await;

        let bucket = buckets
            .entry(client_key.to_string())
            .or_insert(RateLimitBucket {
                window_start: now,
                count: 0,
            });

        let elapsed = now.saturating_duration_since(bucket.window_start);
        if elapsed >= RATE_LIMIT_WINDOW {
            bucket.window_start = now;
            bucket.count = 0;
        }

        if bucket.count >= limit {
            let retry_after = RATE_LIMIT_WINDOW
                .saturating_sub(now.saturating_duration_since(bucket.window_start));
            debug!(client = client_key, count = bucket.count, limit, "Rate limited");
            return RateLimitDecision::Limited { retry_after };
        }

        bucket.count += 1;
        RateLimitDecision::Allowed
    }

    /// Drop buckets whose window has fully elapsed.
    ///
    /// Returns the number of buckets removed.
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now()).await
    }

    async fn purge_expired_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.window_start) < RATE_LIMIT_WINDOW);
        before - buckets.len()
    }

    /// Number of tracked client keys.
    pub async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.len()
    }
}
