//! Rate-limit accounting
//!
//! Quota state parsed from response headers, corrected for clock skew
//! against the server's `date` header, plus the process-wide global
//! throttle every bucket awaits.

use crate::transport::HttpResponse;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time::Instant;

/// Rate-limit state parsed from one response
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    /// Total requests allowed per window, when communicated
    pub limit: Option<u64>,
    /// Requests left in the window; absent headers leave one in hand
    pub remaining: i64,
    /// Local epoch milliseconds when the window resets
    pub reset_at_ms: i64,
    /// Server-mandated retry delay in milliseconds (429/global)
    pub retry_after_ms: Option<u64>,
    /// Whether this response signals the global throttle
    pub global: bool,
}

impl RateLimitInfo {
    /// Parse quota headers, correcting the reset time by the offset
    /// between the server's `date` header and the local clock
    #[must_use]
    pub fn from_response(response: &HttpResponse, local_now_ms: i64) -> Self {
        let limit = response
            .header("x-ratelimit-limit")
            .and_then(|v| v.parse::<u64>().ok());
        let remaining = response
            .header("x-ratelimit-remaining")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(1);
        let retry_after_ms = response
            .header("retry-after")
            .and_then(|v| v.parse::<u64>().ok());
        let global = response
            .header("x-ratelimit-global")
            .is_some_and(|v| v != "false");

        let offset_ms = response
            .header("date")
            .and_then(|date| server_offset_ms(date, local_now_ms))
            .unwrap_or(0);

        let reset_at_ms = response
            .header("x-ratelimit-reset")
            .and_then(|v| v.parse::<f64>().ok())
            .map_or(local_now_ms, |reset| (reset * 1000.0) as i64 - offset_ms);

        Self {
            limit,
            remaining,
            reset_at_ms,
            retry_after_ms,
            global,
        }
    }
}

/// Difference between the server clock and ours, in milliseconds
fn server_offset_ms(date_header: &str, local_now_ms: i64) -> Option<i64> {
    let parsed = chrono::DateTime::parse_from_rfc2822(date_header).ok()?;
    Some(parsed.timestamp_millis() - local_now_ms)
}

/// Local wall-clock epoch milliseconds
#[must_use]
pub fn local_now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Process-wide global throttle
///
/// The only state shared across buckets. Written by whichever bucket
/// observes the global header first; awaited by every bucket before
/// dispatching.
#[derive(Debug, Clone, Default)]
pub struct GlobalThrottle {
    until: Arc<RwLock<Option<Instant>>>,
}

impl GlobalThrottle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Throttle every bucket for the given duration
    ///
    /// A longer existing deadline wins.
    pub fn set(&self, duration: std::time::Duration) {
        let deadline = Instant::now() + duration;
        let mut until = self.until.write();
        match *until {
            Some(existing) if existing >= deadline => {}
            _ => *until = Some(deadline),
        }
    }

    /// Whether the throttle is currently active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.until.read().is_some_and(|deadline| deadline > Instant::now())
    }

    /// Wait out the throttle, if one is active
    pub async fn wait(&self) {
        let deadline = *self.until.read();
        if let Some(deadline) = deadline {
            if deadline > Instant::now() {
                tokio::time::sleep_until(deadline).await;
            }
        }
    }
}
