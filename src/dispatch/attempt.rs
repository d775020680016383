//! One HTTP call's worth of bookkeeping.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Which configured endpoint an attempt went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    Primary,
    Secondary,
}

impl EndpointRole {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointRole::Primary => "primary",
            EndpointRole::Secondary => "secondary",
        }
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    HttpError { code: u16 },
    NetworkError,
    MalformedResponse,
}

impl AttemptOutcome {
    pub const RATE_LIMITED: u16 = 429;

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AttemptOutcome::HttpError { code } if *code == Self::RATE_LIMITED)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::HttpError { code } if *code == Self::RATE_LIMITED => "rate_limited",
            AttemptOutcome::HttpError { .. } => "http_error",
            AttemptOutcome::NetworkError => "network_error",
            AttemptOutcome::MalformedResponse => "malformed_response",
        }
    }
}

/// Immutable record of one HTTP call. Built once, logged immediately.
#[derive(Debug, Clone, Serialize)]
pub struct RequestAttempt {
    pub endpoint: EndpointRole,
    pub endpoint_url: String,
    /// Counted attempt index (1-based). Failover reuses the current index.
    pub index: u32,
    pub started_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub outcome: AttemptOutcome,
    /// HTTP status when a response arrived.
    pub http_status: Option<u16>,
    /// Response body or transport error text, truncated.
    pub detail: String,
    /// Why the attempt did not succeed.
    pub error: Option<String>,
}

/// Upper bound on response text carried in an attempt record.
pub const MAX_DETAIL_BYTES: usize = 4096;

/// Truncate on a char boundary at or below `max` bytes.
pub fn truncate_detail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Linear backoff: `base * n`, where `n` is the attempt that just failed.
pub fn backoff_delay(base: Duration, n: u32) -> Duration {
    base.saturating_mul(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_scales_with_attempt() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(3000));
    }

    #[test]
    fn test_outcome_classification() {
        let limited = AttemptOutcome::HttpError { code: 429 };
        assert!(limited.is_rate_limited());
        assert_eq!(limited.label(), "rate_limited");

        let server = AttemptOutcome::HttpError { code: 503 };
        assert!(!server.is_rate_limited());
        assert_eq!(server.label(), "http_error");

        assert!(!AttemptOutcome::NetworkError.is_rate_limited());
        assert_eq!(AttemptOutcome::NetworkError.label(), "network_error");
        assert_eq!(AttemptOutcome::MalformedResponse.label(), "malformed_response");
        assert_eq!(AttemptOutcome::Success.label(), "success");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "héllo";
        assert_eq!(truncate_detail(s, 2), "h");
        assert_eq!(truncate_detail(s, 3), "hé");
        assert_eq!(truncate_detail(s, 100), "héllo");
    }
}
