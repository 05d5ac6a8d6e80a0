//! Poll pacing derived from the remote service's response headers.
//!
//! The services throttle status polling in two ways: a quota window
//! (`x-ratelimit-remaining` / `x-ratelimit-reset`) and a per-response
//! `retry-after` hint. An exhausted quota always wins; otherwise the hint is
//! followed verbatim.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

/// Delay used when the service gives no usable hint.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Longest single sleep between polls, whatever the service asks for.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Pacing signals read from one poll response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacingHeaders {
    pub quota_remaining: Option<i64>,
    pub quota_reset_at: Option<DateTime<Utc>>,
    pub retry_after_secs: Option<f64>,
}

impl PacingHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        Self {
            quota_remaining: text(RATELIMIT_REMAINING).and_then(|v| v.trim().parse().ok()),
            quota_reset_at: text(RATELIMIT_RESET).and_then(parse_timestamp),
            retry_after_secs: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now())),
        }
    }

    pub fn next_delay(&self, now: DateTime<Utc>) -> Duration {
        next_delay(
            self.quota_remaining,
            self.quota_reset_at,
            self.retry_after_secs,
            now,
        )
    }
}

/// Delay before the next poll.
///
/// With the quota exhausted the wait runs until the quota window resets;
/// otherwise it is the server's retry-after. Anything non-positive or missing
/// falls back to [`DEFAULT_POLL_INTERVAL`]; anything longer than
/// [`MAX_POLL_INTERVAL`] is cut down to it.
pub fn next_delay(
    quota_remaining: Option<i64>,
    quota_reset_at: Option<DateTime<Utc>>,
    retry_after_secs: Option<f64>,
    now: DateTime<Utc>,
) -> Duration {
    let secs = if quota_remaining == Some(0) {
        quota_reset_at.map(|reset| (reset - now).num_milliseconds() as f64 / 1000.0)
    } else {
        retry_after_secs
    };
    clamp_delay(secs)
}

/// Delay before the first poll of a freshly submitted job.
pub fn initial_delay(pacing_hint_secs: Option<f64>) -> Duration {
    clamp_delay(pacing_hint_secs)
}

fn clamp_delay(secs: Option<f64>) -> Duration {
    match secs {
        Some(s) if s.is_finite() && s > 0.0 => Duration::try_from_secs_f64(s)
            .map(|delay| delay.min(MAX_POLL_INTERVAL))
            .unwrap_or(MAX_POLL_INTERVAL),
        _ => DEFAULT_POLL_INTERVAL,
    }
}

/// `retry-after` is either delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<f64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return Some(secs);
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|at| (at.with_timezone(&Utc) - now).num_milliseconds() as f64 / 1000.0)
}

/// Quota reset timestamps come as RFC 3339, HTTP dates, or epoch seconds.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        return Some(at.with_timezone(&Utc));
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single())
}
