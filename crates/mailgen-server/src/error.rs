use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mailgen_core::errors::GatewayError;
use mailgen_engine::EngineError;
use mailgen_store::StoreError;
use serde_json::json;
use tracing::{error, warn};

/// Error surfaced to HTTP callers. Detail goes to the log; the body only
/// carries a coarse message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("user not found")]
    UserNotFound,

    #[error("draft not found")]
    DraftNotFound,

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} not configured")]
    NotConfigured(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("{failed} of {total} sends failed")]
    PartialSendFailure { failed: usize, total: usize },

    #[error("upstream unavailable: {0}")]
    Upstream(GatewayError),

    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::UserNotFound | ApiError::DraftNotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotConfigured(_)
            | ApiError::GenerationFailed(_)
            | ApiError::PartialSendFailure { .. }
            | ApiError::Upstream(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            ApiError::Unauthorized => "Unauthorized".into(),
            ApiError::UserNotFound => "User not found".into(),
            ApiError::DraftNotFound => "Draft not found".into(),
            ApiError::RateLimited { .. } => "Rate limit exceeded. Please try again later.".into(),
            ApiError::Validation(_) => "Invalid request data".into(),
            ApiError::NotConfigured(service) => format!("{service} not configured"),
            ApiError::GenerationFailed(_) => "Failed to generate email".into(),
            ApiError::PartialSendFailure { .. } => "Some emails failed to send".into(),
            ApiError::Upstream(_) | ApiError::Internal(_) => "Internal server error".into(),
        }
    }
}

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Upstream(g) = &self {
            error!(error = %self, kind = g.kind(), "provider call failed");
        } else if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "request rejected");
        }

        let mut response = (status, Json(json!({ "error": self.public_message() }))).into_response();
        if let ApiError::RateLimited { retry_after } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(*retry_after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::UpstreamUnavailable(GatewayError::NotConfigured(service)) => {
                ApiError::NotConfigured(service)
            }
            EngineError::UpstreamUnavailable(g) => ApiError::Upstream(g),
            EngineError::GenerationFailed(detail) => ApiError::GenerationFailed(detail),
            EngineError::PartialSendFailure { failed, total } => {
                ApiError::PartialSendFailure { failed, total }
            }
            EngineError::DraftNotFound(_) => ApiError::DraftNotFound,
            EngineError::Store(s) => s.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
