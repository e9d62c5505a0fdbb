//! Error types for upstream inference calls.

use thiserror::Error;

/// Errors surfaced by an [`InferenceClient`](super::InferenceClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Request exceeded its deadline.
    #[error("Upstream timeout after {0}ms")]
    Timeout(u64),

    /// Service throttled the request (HTTP 429).
    #[error("Upstream rate limited: {0}")]
    RateLimited(String),

    /// Service unreachable or failing (5xx, connection refused).
    #[error("Upstream unavailable: {0}")]
    ServiceUnavailable(String),

    /// Service rejected the request; retrying will not help.
    #[error("Upstream rejected request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, UpstreamError::InvalidRequest(_))
    }

    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::RateLimited(_) => "rate_limited",
            UpstreamError::ServiceUnavailable(_) => "service_unavailable",
            UpstreamError::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Map an HTTP error status to an error kind.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            408 | 504 => UpstreamError::Timeout(0),
            429 => UpstreamError::RateLimited(message),
            500..=599 => UpstreamError::ServiceUnavailable(format!("{}: {}", status, message)),
            _ => UpstreamError::InvalidRequest(format!("{}: {}", status, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_is_not_transient() {
        assert!(!UpstreamError::InvalidRequest("bad".into()).is_transient());
        assert!(UpstreamError::Timeout(10).is_transient());
        assert!(UpstreamError::RateLimited("slow down".into()).is_transient());
        assert!(UpstreamError::ServiceUnavailable("503".into()).is_transient());
    }

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            UpstreamError::from_status(429, "x".into()),
            UpstreamError::RateLimited(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(503, "x".into()),
            UpstreamError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(408, "x".into()),
            UpstreamError::Timeout(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(400, "x".into()),
            UpstreamError::InvalidRequest(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(401, "x".into()),
            UpstreamError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = UpstreamError::Timeout(1500);
        assert_eq!(err.to_string(), "Upstream timeout after 1500ms");
        assert_eq!(err.kind(), "timeout");
    }
}
