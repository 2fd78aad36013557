//! Per-client rate limiting for tile requests.

mod rate_limiter;

pub use rate_limiter::{RateLimitDecision, RateLimiter, RATE_LIMIT_WINDOW};
