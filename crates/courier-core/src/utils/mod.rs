//! Utility modules for courier-core
//!
//! Provides common utilities:
//! - retry: Retry logic with exponential backoff
//! - metrics: Lightweight metrics collection
//! - rate_limiter: Request rate limiting
//! - ttl_cache: Bounded cache with expiry

pub mod metrics;
mod rate_limiter;
mod retry;
mod ttl_cache;

pub use metrics::{global as metrics_global, Counter, Histogram, MetricsRegistry, Timer};
pub use rate_limiter::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use retry::{retry_with_backoff, RetryConfig, RetryError, Retryable};
pub use ttl_cache::TtlCache;
