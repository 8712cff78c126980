use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenAiCompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    Auto,
    PassThrough,
    Collected,
}

impl StreamingMode {
    /// Auto resolves to PassThrough for Anthropic providers and Collected for
    /// OpenAI-compatible ones (spec.md §3): the former already speaks the
    /// client's wire format, the latter needs its stream rewritten chunk by
    /// chunk, which this crate's translator does after fully decoding a
    /// Server-Sent Events frame rather than byte-for-byte.
    pub fn resolve(self, kind: ProviderKind) -> StreamingMode {
        match (self, kind) {
            (StreamingMode::Auto, ProviderKind::Anthropic) => StreamingMode::PassThrough,
            (StreamingMode::Auto, ProviderKind::OpenAiCompatible) => StreamingMode::Collected,
            (explicit, _) => explicit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum AuthScheme {
    ApiKey { value: String },
    BearerToken { value: String },
    OAuth { client_id: String, token_url: String },
    Passthrough,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub auth: AuthScheme,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default = "default_streaming_mode")]
    pub streaming_mode: StreamingMode,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_streaming_mode() -> StreamingMode {
    StreamingMode::Auto
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRouteConfig {
    pub pattern: String,
    pub provider_name: String,
    #[serde(default = "default_upstream_model")]
    pub upstream_model: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_upstream_model() -> String {
    "passthrough".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Priority,
    RoundRobin,
    Random,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        SelectionStrategy::Priority
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhaseTimeouts {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: f64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: f64,
    #[serde(default = "default_pool_timeout_secs")]
    pub pool_timeout_secs: f64,
}

fn default_connect_timeout_secs() -> f64 {
    5.0
}

fn default_read_timeout_secs() -> f64 {
    60.0
}

fn default_pool_timeout_secs() -> f64 {
    5.0
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            pool_timeout_secs: default_pool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default)]
    pub streaming: PhaseTimeouts,
    #[serde(default)]
    pub non_streaming: PhaseTimeouts,
    #[serde(default)]
    pub caching: PhaseTimeouts,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeduplicationSettings {
    #[serde(default = "default_grace_period_secs")]
    pub sse_error_cleanup_delay_secs: f64,
}

fn default_grace_period_secs() -> f64 {
    3.0
}

impl Default for DeduplicationSettings {
    fn default() -> Self {
        Self {
            sse_error_cleanup_delay_secs: default_grace_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub selection_strategy: SelectionStrategy,
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "default_true")]
    pub unhealthy_reset_on_success: bool,
    #[serde(default = "default_unhealthy_reset_timeout_secs")]
    pub unhealthy_reset_timeout_secs: u64,
    #[serde(default = "default_sticky_duration_secs")]
    pub sticky_provider_duration_secs: u64,
    #[serde(default = "default_failover_error_types")]
    pub failover_error_types: Vec<String>,
    #[serde(default = "default_failover_http_codes")]
    pub failover_http_codes: Vec<u16>,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub deduplication: DeduplicationSettings,
}

fn default_failure_cooldown_secs() -> u64 {
    30
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_unhealthy_reset_timeout_secs() -> u64 {
    300
}

fn default_sticky_duration_secs() -> u64 {
    120
}

fn default_failover_error_types() -> Vec<String> {
    vec![
        "connection_error".to_string(),
        "connect_timeout".to_string(),
        "ssl_error".to_string(),
        "pool_timeout".to_string(),
        "read_timeout".to_string(),
    ]
}

fn default_failover_http_codes() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selection_strategy: SelectionStrategy::default(),
            failure_cooldown_secs: default_failure_cooldown_secs(),
            unhealthy_threshold: default_unhealthy_threshold(),
            unhealthy_reset_on_success: true,
            unhealthy_reset_timeout_secs: default_unhealthy_reset_timeout_secs(),
            sticky_provider_duration_secs: default_sticky_duration_secs(),
            failover_error_types: default_failover_error_types(),
            failover_http_codes: default_failover_http_codes(),
            timeouts: TimeoutSettings::default(),
            deduplication: DeduplicationSettings::default(),
        }
    }
}

/// Root document: `providers`, `model_routes`, `settings` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootDocument {
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub model_routes: Vec<ModelRouteConfig>,
    #[serde(default)]
    pub settings: Settings,
}

impl RootDocument {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.name.clone()));
            }
        }
        for route in &self.model_routes {
            if !seen.contains(route.provider_name.as_str()) {
                return Err(ConfigError::UnknownProvider {
                    name: route.provider_name.clone(),
                });
            }
        }
        Ok(())
    }
}

pub fn load_from_str(contents: &str) -> Result<RootDocument, ConfigError> {
    let document: RootDocument = serde_yaml::from_str(contents)?;
    document.validate()?;
    Ok(document)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<RootDocument, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    load_from_str(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
providers:
  - name: p1
    kind: anthropic
    base_url: https://api.anthropic.com
    auth:
      scheme: api_key
      value: sk-ant-test
model_routes:
  - pattern: "claude-3-5-haiku-20241022"
    provider_name: p1
settings:
  selection_strategy: priority
"#;

    #[test]
    fn parses_minimal_document_with_defaults() {
        let document = load_from_str(SAMPLE).unwrap();
        assert_eq!(document.providers.len(), 1);
        assert!(document.providers[0].enabled);
        assert_eq!(document.settings.unhealthy_threshold, 3);
        assert_eq!(document.settings.selection_strategy, SelectionStrategy::Priority);
    }

    #[test]
    fn route_pointing_at_unknown_provider_is_rejected() {
        let broken = SAMPLE.replace("provider_name: p1", "provider_name: ghost");
        assert!(matches!(
            load_from_str(&broken),
            Err(ConfigError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn duplicate_provider_names_are_rejected() {
        let doc = RootDocument {
            providers: vec![
                ProviderConfig {
                    name: "p1".to_string(),
                    kind: ProviderKind::Anthropic,
                    base_url: "https://a".to_string(),
                    auth: AuthScheme::Passthrough,
                    proxy_url: None,
                    streaming_mode: StreamingMode::Auto,
                    enabled: true,
                },
                ProviderConfig {
                    name: "p1".to_string(),
                    kind: ProviderKind::Anthropic,
                    base_url: "https://b".to_string(),
                    auth: AuthScheme::Passthrough,
                    proxy_url: None,
                    streaming_mode: StreamingMode::Auto,
                    enabled: true,
                },
            ],
            model_routes: vec![],
            settings: Settings::default(),
        };
        assert!(matches!(doc.validate(), Err(ConfigError::DuplicateProvider(_))));
    }
}
