use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::SourceError;

pub const BASE_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
const MAX_BACKOFF_SHIFT: usize = 6;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);
static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Bounded exponential backoff applied to every PagerDuty call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first request; never below one.
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff_ms: BASE_BACKOFF_MS,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt may follow the zero-based `attempt` that just failed.
    pub fn allows_retry_after(&self, attempt: usize) -> bool {
        attempt.saturating_add(1) < self.max_attempts.max(1)
    }

    pub fn is_retryable(&self, error: &SourceError) -> bool {
        match error {
            SourceError::Http(error) => is_retryable_http_error(error),
            SourceError::HttpStatus { status, .. } => should_retry_status(*status),
            _ => false,
        }
    }

    pub fn backoff_ms(&self, attempt: usize) -> u64 {
        let shift = attempt.min(MAX_BACKOFF_SHIFT);
        self.base_backoff_ms.saturating_mul(1_u64 << shift)
    }

    pub fn backoff_ms_with_jitter(&self, attempt: usize) -> u64 {
        let base = self.backoff_ms(attempt);
        if !self.jitter || base <= 1 {
            return base;
        }

        // Bounded jitter in [50%, 100%] of the deterministic backoff.
        let low = base / 2;
        let width = base.saturating_sub(low);
        let seed = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17) ^ 0xA24B_AED4_963E_E407;
        let jitter = if width == 0 {
            0
        } else {
            mixed % width.saturating_add(1)
        };
        low.saturating_add(jitter)
    }

    /// Delay before the next attempt; a server `Retry-After` acts as a floor.
    pub fn delay(&self, attempt: usize, retry_after_ms: Option<u64>) -> Duration {
        let backoff_ms = self.backoff_ms_with_jitter(attempt);
        let delay_ms = match retry_after_ms {
            Some(retry_after_ms) => backoff_ms.max(retry_after_ms),
            None => backoff_ms,
        };
        Duration::from_millis(delay_ms)
    }
}

pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 425 || status == 429 || status >= 500
}

pub fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

pub fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    if delay_ms <= 0 {
        return Some(0);
    }

    u64::try_from(delay_ms).ok()
}

pub fn new_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("pulse-{millis}-{count}")
}
