//! Terminal errors surfaced to dispatch callers.
//!
//! Intermediate failures (429s, 5xx, dropped connections) never appear
//! here — they are attempt outcomes, logged and retried. A caller only
//! ever sees one of these three.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Every allowed attempt failed.
    #[error("upstream exhausted after {attempts} attempt(s): {last_error}")]
    UpstreamExhausted {
        attempts: u32,
        last_status: Option<u16>,
        last_error: String,
    },

    /// A 2xx response without the expected `choices[0].message.content`.
    #[error("malformed upstream response (HTTP {status}): {detail}")]
    MalformedResponse { status: u16, detail: String },

    /// The usage log refused a write; the dispatch is abandoned.
    #[error("usage log write failed: {0:#}")]
    LoggingFailure(#[source] anyhow::Error),
}

impl DispatchError {
    /// Short machine-readable tag, used in logs and usage entries.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UpstreamExhausted { .. } => "upstream_exhausted",
            DispatchError::MalformedResponse { .. } => "malformed_response",
            DispatchError::LoggingFailure(_) => "logging_failure",
        }
    }
}

/// A transport-level failure: no HTTP response was received.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let e = DispatchError::UpstreamExhausted {
            attempts: 3,
            last_status: Some(500),
            last_error: "boom".into(),
        };
        assert_eq!(e.kind(), "upstream_exhausted");
        assert!(e.to_string().contains("3 attempt"));

        let e = DispatchError::LoggingFailure(anyhow::anyhow!("disk full"));
        assert_eq!(e.kind(), "logging_failure");
        assert!(e.to_string().contains("disk full"));
    }
}
