use bytes::Bytes;
use http::StatusCode;

use gproxy_protocol::claude::types::ErrorEnvelope;

/// Client-facing error, always an Anthropic-shaped error envelope (spec.md §5).
#[derive(Debug)]
pub struct OrchestratorError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl OrchestratorError {
    pub fn new(status: StatusCode, kind: &str, message: impl Into<String>) -> Self {
        let envelope = ErrorEnvelope::new(kind, message);
        let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| b"{}".to_vec());
        Self {
            status,
            body: Bytes::from(body),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request_error", message)
    }

    /// No candidate providers for the requested model, or all disabled/unhealthy.
    /// Deliberately generic per spec.md §7: never reveals individual provider
    /// names or errors here, unlike the final-attempt passthrough case.
    pub fn no_providers_available() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "overloaded_error",
            "no healthy upstream provider is available for this model",
        )
    }

    pub fn authorization_required(provider_name: &str) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "authentication_error",
            format!("provider {provider_name:?} requires re-authorization"),
        )
    }

    pub fn from_upstream(status: u16, body: Bytes) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
        Self { status, body }
    }
}
