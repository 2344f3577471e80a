use std::time::Duration;

/// How a caller should react to a [`GatewayError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Transient; the same request may succeed later.
    Retry,
    /// Configuration or request problem; repeating it cannot help.
    Fatal,
    /// The call ran out of time. Not retried because the outer request
    /// budget is already spent.
    Expired,
}

/// Failure of an external provider call (AI completion or email dispatch).
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0} not configured")]
    NotConfigured(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::RateLimited { .. }
            | Self::ServerError { .. }
            | Self::ProviderOverloaded
            | Self::NetworkError(_) => Disposition::Retry,
            Self::Timeout(_) => Disposition::Expired,
            Self::NotConfigured(_)
            | Self::AuthenticationFailed(_)
            | Self::InvalidRequest(_)
            | Self::MalformedResponse(_) => Disposition::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }

    pub fn is_fatal(&self) -> bool {
        self.disposition() == Disposition::Fatal
    }

    /// Provider-supplied wait before the next attempt, if any.
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "not_configured",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MalformedResponse(_) => "malformed_response",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ProviderOverloaded => "provider_overloaded",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Reads a Retry-After header value given in whole seconds. HTTP-date
    /// values are ignored.
    pub fn parse_retry_after(raw: &str) -> Option<Duration> {
        raw.trim().parse::<u64>().ok().map(Duration::from_secs)
    }

    /// Maps a non-2xx provider response. `retry_after` is only kept for 429.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after },
            503 | 529 => Self::ProviderOverloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retried() {
        for err in [
            GatewayError::RateLimited { retry_after: None },
            GatewayError::ServerError { status: 500, body: "err".into() },
            GatewayError::ProviderOverloaded,
            GatewayError::NetworkError("connection reset".into()),
        ] {
            assert_eq!(err.disposition(), Disposition::Retry, "{err}");
        }
    }

    #[test]
    fn missing_key_and_bad_requests_are_fatal() {
        assert!(GatewayError::NotConfigured("AI service".into()).is_fatal());
        assert!(GatewayError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(GatewayError::InvalidRequest("model not found".into()).is_fatal());
        assert!(GatewayError::MalformedResponse("no choices".into()).is_fatal());
    }

    #[test]
    fn timeout_expires_without_retry() {
        let err = GatewayError::Timeout(Duration::from_secs(30));
        assert_eq!(err.disposition(), Disposition::Expired);
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn retry_after_survives_only_on_429() {
        let hint = Some(Duration::from_secs(5));
        assert_eq!(
            GatewayError::from_status(429, String::new(), hint).suggested_delay(),
            hint
        );
        assert_eq!(
            GatewayError::from_status(503, String::new(), hint).suggested_delay(),
            None
        );
    }

    #[test]
    fn retry_after_seconds_only() {
        assert_eq!(GatewayError::parse_retry_after(" 7 "), Some(Duration::from_secs(7)));
        assert_eq!(GatewayError::parse_retry_after("Wed, 21 Oct 2026 07:28:00 GMT"), None);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(GatewayError::from_status(401, "unauthorized".into(), None).kind(), "authentication_failed");
        assert_eq!(GatewayError::from_status(422, "validation_error".into(), None).kind(), "invalid_request");
        assert_eq!(GatewayError::from_status(529, String::new(), None).kind(), "provider_overloaded");
        assert!(matches!(
            GatewayError::from_status(502, "bad gateway".into(), None),
            GatewayError::ServerError { status: 502, .. }
        ));
        assert!(GatewayError::from_status(302, "redirect".into(), None).is_fatal());
    }
}
