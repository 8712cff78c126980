use std::fmt;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone)]
pub enum ProviderError {
    InvalidConfig(String),
    MissingCredentialField(&'static str),
    /// A transport-level failure the client was able to classify into one of
    /// the spec.md §4.2 error kinds (connect/TLS/pool/read timeout,
    /// connection refused). Carries the classification through to the
    /// orchestrator so it can apply the §7 policy table instead of treating
    /// every dispatch failure the same way.
    Transport(ErrorKind, String),
    Other(String),
}

impl ProviderError {
    /// The classified kind, when this error originated below the HTTP layer
    /// (the orchestrator derives `ErrorKind::Http`/`ApiError` itself from a
    /// response it did receive).
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ProviderError::Transport(kind, _) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            ProviderError::MissingCredentialField(field) => {
                write!(f, "missing credential field: {field}")
            }
            ProviderError::Transport(_, msg) => write!(f, "{msg}"),
            ProviderError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Classification of one upstream attempt's outcome (spec.md §4.2, §7).
///
/// `Transport` kinds never carry an HTTP status (the request never completed);
/// `Http` kinds always do. Kept distinct from the surfaced client status,
/// which the orchestrator derives separately depending on whether failover is
/// exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionError,
    ConnectTimeout,
    SslError,
    PoolTimeout,
    ReadTimeout,
    Http(u16),
    /// HTTP 401/403 against a provider whose auth scheme is OAuth.
    OAuthUnauthorized,
    /// 2xx response whose body is actually an Anthropic-shaped error envelope.
    ApiError,
    /// `event: error` seen in an SSE stream.
    StreamError,
}

impl ErrorKind {
    pub fn as_config_key(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::SslError => "ssl_error",
            ErrorKind::PoolTimeout => "pool_timeout",
            ErrorKind::ReadTimeout => "read_timeout",
            ErrorKind::Http(_) => "http",
            ErrorKind::OAuthUnauthorized => "oauth_unauthorized",
            ErrorKind::ApiError => "api_error",
            ErrorKind::StreamError => "stream_error",
        }
    }
}

/// Policy decision for one classified outcome: whether to try the next
/// candidate, whether it should taint the provider's health counter, and
/// (when failover is not attempted or is exhausted) what status to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    pub should_failover: bool,
    pub counts_toward_unhealthy: bool,
    pub surfaced_status: u16,
}

/// Implements the table in spec.md §7. `failover_http_codes` covers the
/// generic "HTTP 5xx, 429, 408" row; OAuth-flagged 401/403 is the one
/// hard-coded exception that never fails over and never taints health.
pub fn classify(
    kind: ErrorKind,
    is_oauth_provider: bool,
    failover_http_codes: &[u16],
) -> ErrorPolicy {
    match kind {
        ErrorKind::ConnectionError | ErrorKind::ConnectTimeout | ErrorKind::SslError
        | ErrorKind::PoolTimeout => ErrorPolicy {
            should_failover: true,
            counts_toward_unhealthy: true,
            surfaced_status: 502,
        },
        ErrorKind::ReadTimeout => ErrorPolicy {
            should_failover: true,
            counts_toward_unhealthy: true,
            surfaced_status: 504,
        },
        ErrorKind::Http(401) | ErrorKind::Http(403) if is_oauth_provider => ErrorPolicy {
            should_failover: false,
            counts_toward_unhealthy: false,
            surfaced_status: kind_status(kind),
        },
        ErrorKind::OAuthUnauthorized => ErrorPolicy {
            should_failover: false,
            counts_toward_unhealthy: false,
            surfaced_status: 401,
        },
        ErrorKind::Http(401) | ErrorKind::Http(403) => ErrorPolicy {
            should_failover: true,
            counts_toward_unhealthy: true,
            surfaced_status: kind_status(kind),
        },
        ErrorKind::Http(status) if failover_http_codes.contains(&status) => ErrorPolicy {
            should_failover: true,
            counts_toward_unhealthy: true,
            surfaced_status: status,
        },
        ErrorKind::Http(status) => ErrorPolicy {
            should_failover: false,
            counts_toward_unhealthy: false,
            surfaced_status: status,
        },
        ErrorKind::ApiError => ErrorPolicy {
            should_failover: true,
            counts_toward_unhealthy: true,
            surfaced_status: 502,
        },
        ErrorKind::StreamError => ErrorPolicy {
            should_failover: true,
            counts_toward_unhealthy: true,
            surfaced_status: 502,
        },
    }
}

fn kind_status(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Http(status) => status,
        _ => 502,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_401_never_fails_over_or_taints_health() {
        let policy = classify(ErrorKind::Http(401), true, &[401, 500]);
        assert!(!policy.should_failover);
        assert!(!policy.counts_toward_unhealthy);
        assert_eq!(policy.surfaced_status, 401);
    }

    #[test]
    fn non_oauth_401_fails_over() {
        let policy = classify(ErrorKind::Http(401), false, &[500]);
        assert!(policy.should_failover);
        assert!(policy.counts_toward_unhealthy);
    }

    #[test]
    fn generic_4xx_does_not_failover_by_default() {
        let policy = classify(ErrorKind::Http(422), false, &[500, 502]);
        assert!(!policy.should_failover);
    }

    #[test]
    fn configured_5xx_fails_over() {
        let policy = classify(ErrorKind::Http(503), false, &[503]);
        assert!(policy.should_failover);
        assert_eq!(policy.surfaced_status, 503);
    }
}
