use async_trait::async_trait;
use gproxy_common::{AuthScheme, ProviderConfig, ProviderKind};

use crate::headers::{header_get, header_set, Headers};

/// Capability the core consumes for OAuth providers (spec.md §1 Out-of-scope,
/// §4.5). Token acquisition UX (device flow, secure storage) lives entirely
/// outside the core; this is the only seam it needs.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn current_token(&self, provider_name: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("provider {0:?} requires OAuth authorization but no token is available")]
    AuthorizationRequired(String),
}

const HOP_BY_HOP: &[&str] = &["authorization", "x-api-key", "host", "content-length"];

/// Builds outbound headers for one attempt against `provider` (spec.md §4.5).
/// Rebuilt fresh per attempt; callers must never carry a prior attempt's
/// headers over to the next candidate.
pub async fn resolve_auth(
    provider: &ProviderConfig,
    inbound: &Headers,
    token_source: &dyn TokenSource,
) -> Result<Headers, AuthError> {
    let mut outbound: Headers = inbound
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()))
        .cloned()
        .collect();

    match &provider.auth {
        AuthScheme::Passthrough => {
            if let Some(value) = header_get(inbound, "authorization") {
                header_set(&mut outbound, "authorization", value.to_string());
            }
            if let Some(value) = header_get(inbound, "x-api-key") {
                header_set(&mut outbound, "x-api-key", value.to_string());
            }
        }
        AuthScheme::ApiKey { value } => match provider.kind {
            ProviderKind::Anthropic => {
                header_set(&mut outbound, "x-api-key", value.clone());
                header_set(&mut outbound, "anthropic-version", "2023-06-01");
            }
            ProviderKind::OpenAiCompatible => {
                header_set(&mut outbound, "authorization", format!("Bearer {value}"));
            }
        },
        AuthScheme::BearerToken { value } => {
            header_set(&mut outbound, "authorization", format!("Bearer {value}"));
            if provider.kind == ProviderKind::Anthropic {
                header_set(&mut outbound, "anthropic-version", "2023-06-01");
            }
        }
        AuthScheme::OAuth { .. } => {
            let token = token_source
                .current_token(&provider.name)
                .await
                .ok_or_else(|| AuthError::AuthorizationRequired(provider.name.clone()))?;
            header_set(&mut outbound, "authorization", format!("Bearer {token}"));
        }
    }

    Ok(outbound)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticToken(Option<&'static str>);

    #[async_trait]
    impl TokenSource for StaticToken {
        async fn current_token(&self, _provider_name: &str) -> Option<String> {
            self.0.map(|s| s.to_string())
        }
    }

    fn provider(kind: ProviderKind, auth: AuthScheme) -> ProviderConfig {
        ProviderConfig {
            name: "p1".to_string(),
            kind,
            base_url: "https://example.test".to_string(),
            auth,
            proxy_url: None,
            streaming_mode: gproxy_common::StreamingMode::Auto,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn api_key_on_anthropic_sets_x_api_key_and_version() {
        let provider = provider(
            ProviderKind::Anthropic,
            AuthScheme::ApiKey {
                value: "sk-ant-1".to_string(),
            },
        );
        let headers = resolve_auth(&provider, &[], &StaticToken(None))
            .await
            .unwrap();
        assert_eq!(header_get(&headers, "x-api-key"), Some("sk-ant-1"));
        assert_eq!(header_get(&headers, "anthropic-version"), Some("2023-06-01"));
    }

    #[tokio::test]
    async fn api_key_on_openai_compatible_uses_bearer() {
        let provider = provider(
            ProviderKind::OpenAiCompatible,
            AuthScheme::ApiKey {
                value: "sk-1".to_string(),
            },
        );
        let headers = resolve_auth(&provider, &[], &StaticToken(None))
            .await
            .unwrap();
        assert_eq!(header_get(&headers, "authorization"), Some("Bearer sk-1"));
    }

    #[tokio::test]
    async fn passthrough_copies_inbound_auth_headers_unchanged() {
        let provider = provider(ProviderKind::Anthropic, AuthScheme::Passthrough);
        let inbound = vec![("x-api-key".to_string(), "client-key".to_string())];
        let headers = resolve_auth(&provider, &inbound, &StaticToken(None))
            .await
            .unwrap();
        assert_eq!(header_get(&headers, "x-api-key"), Some("client-key"));
    }

    #[tokio::test]
    async fn oauth_without_token_raises_authorization_required() {
        let provider = provider(
            ProviderKind::OpenAiCompatible,
            AuthScheme::OAuth {
                client_id: "c".to_string(),
                token_url: "https://example.test/token".to_string(),
            },
        );
        let err = resolve_auth(&provider, &[], &StaticToken(None))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::AuthorizationRequired("p1".to_string()));
    }

    #[tokio::test]
    async fn host_and_content_length_are_stripped() {
        let provider = provider(ProviderKind::Anthropic, AuthScheme::Passthrough);
        let inbound = vec![
            ("host".to_string(), "client.example".to_string()),
            ("content-length".to_string(), "12".to_string()),
            ("x-request-id".to_string(), "abc".to_string()),
        ];
        let headers = resolve_auth(&provider, &inbound, &StaticToken(None))
            .await
            .unwrap();
        assert!(header_get(&headers, "host").is_none());
        assert!(header_get(&headers, "content-length").is_none());
        assert_eq!(header_get(&headers, "x-request-id"), Some("abc"));
    }
}
