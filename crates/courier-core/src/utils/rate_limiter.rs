//! Rate limiting for request throttling
//!
//! Sliding-window limiter keyed by an arbitrary string (tenant, tenant and
//! channel, ...). Used to cap automation triggers per tenant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Time window for rate limiting
    pub window: Duration,
}

impl RateLimitConfig {
    /// Create a new rate limit config
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Create config for requests per hour
    #[must_use]
    pub fn per_hour(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(3600))
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Time until the oldest request leaves the window
    pub reset_after: Duration,
    /// Request count in the window, including this one when allowed
    pub current: u32,
}

#[derive(Debug)]
struct Windows {
    keys: HashMap<String, Vec<Instant>>,
    last_sweep: Instant,
}

impl Windows {
    /// Drop keys whose requests have all left the window
    fn sweep(&mut self, now: Instant, window: Duration) {
        self.keys.retain(|_, records| {
            records.retain(|t| now.duration_since(*t) < window);
            !records.is_empty()
        });
        self.last_sweep = now;
    }
}

/// In-memory rate limiter using a sliding window.
///
/// Idle keys are swept at most once per window, on the next `acquire`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<RwLock<Windows>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(RwLock::new(Windows {
                keys: HashMap::new(),
                last_sweep: Instant::now(),
            })),
        }
    }

    fn reset_after(&self, records: &[Instant], now: Instant) -> Duration {
        records
            .first()
            .map(|oldest| (*oldest + self.config.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Check and record in one step under the write lock
    pub async fn acquire(&self, key: &str) -> RateLimitResult {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        if now.duration_since(windows.last_sweep) >= self.config.window {
            windows.sweep(now, self.config.window);
        }

        let records = windows.keys.entry(key.to_string()).or_default();
        records.retain(|t| now.duration_since(*t) < self.config.window);

        let current = records.len() as u32;
        if current < self.config.max_requests {
            records.push(now);
            RateLimitResult {
                allowed: true,
                remaining: self.config.max_requests - current - 1,
                reset_after: self.reset_after(records, now),
                current: current + 1,
            }
        } else {
            RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_after: self.reset_after(records, now),
                current,
            }
        }
    }
}
