use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use gproxy_common::{ModelRouteConfig, SelectionStrategy};
use rand::Rng;

use crate::health::HealthTracker;
use crate::registry::{ProviderEntry, ProviderRegistry};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub upstream_model: String,
    pub provider: Arc<ProviderEntry>,
}

/// Process-wide sticky state: a single `(last_successful_provider, last_request_time)`
/// pair, not one per pattern or client (spec.md §3). Exactly one in-flight
/// "session" is assumed to matter for stickiness across the whole process.
struct StickyState {
    last_successful_provider: Option<String>,
    last_request_time: Option<Instant>,
}

pub struct RouteSelector {
    sticky: Mutex<StickyState>,
    round_robin_counters: Mutex<HashMap<String, u64>>,
    sticky_duration: Duration,
}

impl RouteSelector {
    pub fn new(sticky_duration: Duration) -> Self {
        Self {
            sticky: Mutex::new(StickyState {
                last_successful_provider: None,
                last_request_time: None,
            }),
            round_robin_counters: Mutex::new(HashMap::new()),
            sticky_duration,
        }
    }

    /// Records that `provider_name` just served a request successfully and
    /// was not a failover fallback (spec.md §4.8 "sticky provider update").
    pub fn note_success(&self, provider_name: &str) {
        let mut sticky = self.sticky.lock().expect("sticky mutex poisoned");
        sticky.last_successful_provider = Some(provider_name.to_string());
        sticky.last_request_time = Some(Instant::now());
    }

    pub fn select(
        &self,
        requested_model: &str,
        registry: &ProviderRegistry,
        health: &HealthTracker,
        strategy: SelectionStrategy,
    ) -> Vec<Candidate> {
        let routes = registry.routes();
        let Some(pattern) = first_matching_pattern(&routes, requested_model) else {
            return Vec::new();
        };

        let mut matched: Vec<&ModelRouteConfig> = routes
            .iter()
            .filter(|route| route.pattern == pattern && route.enabled)
            .collect();
        matched.sort_by_key(|route| route.priority);

        let mut candidates: Vec<Candidate> = matched
            .into_iter()
            .filter_map(|route| {
                let entry = registry.by_name(&route.provider_name)?;
                if !health.is_healthy(&route.provider_name) {
                    return None;
                }
                let upstream_model = if route.upstream_model == "passthrough" {
                    requested_model.to_string()
                } else {
                    route.upstream_model.clone()
                };
                Some(Candidate {
                    upstream_model,
                    provider: entry,
                })
            })
            .collect();

        self.apply_strategy(&pattern, strategy, &mut candidates);
        self.apply_stickiness(&mut candidates);
        candidates
    }

    fn apply_strategy(
        &self,
        pattern: &str,
        strategy: SelectionStrategy,
        candidates: &mut Vec<Candidate>,
    ) {
        match strategy {
            SelectionStrategy::Priority => {}
            SelectionStrategy::RoundRobin => {
                if candidates.is_empty() {
                    return;
                }
                let mut counters = self
                    .round_robin_counters
                    .lock()
                    .expect("round robin mutex poisoned");
                let counter = counters.entry(pattern.to_string()).or_insert(0);
                let offset = (*counter as usize) % candidates.len();
                *counter = counter.wrapping_add(1);
                candidates.rotate_left(offset);
            }
            SelectionStrategy::Random => {
                if candidates.len() > 1 {
                    let top = candidates.len().min(3);
                    let picked = rand::rng().random_range(0..top);
                    candidates.swap(0, picked);
                }
            }
        }
    }

    /// Overlay applied regardless of base strategy (spec.md §4.3 step 5).
    fn apply_stickiness(&self, candidates: &mut Vec<Candidate>) {
        let sticky = self.sticky.lock().expect("sticky mutex poisoned");
        let Some(last_request_time) = sticky.last_request_time else {
            return;
        };
        if last_request_time.elapsed() > self.sticky_duration {
            return;
        }
        let Some(sticky_provider) = &sticky.last_successful_provider else {
            return;
        };
        if let Some(idx) = candidates
            .iter()
            .position(|c| c.provider.config.name == *sticky_provider)
        {
            if idx != 0 {
                let sticky_candidate = candidates.remove(idx);
                candidates.insert(0, sticky_candidate);
            }
        }
    }
}

fn first_matching_pattern(routes: &[ModelRouteConfig], requested_model: &str) -> Option<String> {
    if let Some(route) = routes
        .iter()
        .find(|r| r.enabled && r.pattern == requested_model)
    {
        return Some(route.pattern.clone());
    }
    routes
        .iter()
        .find(|r| r.enabled && glob_matches(&r.pattern, requested_model))
        .map(|r| r.pattern.clone())
}

fn glob_matches(pattern: &str, model: &str) -> bool {
    if !pattern.contains('*') {
        return false;
    }
    let (prefix, suffix) = pattern.split_once('*').unwrap_or((pattern, ""));
    model.starts_with(prefix) && model.ends_with(suffix) && model.len() >= prefix.len() + suffix.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gproxy_common::{AuthScheme, ProviderConfig, ProviderKind, RootDocument, StreamingMode};
    use gproxy_provider_core::{
        DispatchContext, Provider, ProviderResult, UpstreamHttpRequest, UpstreamHttpResponse,
    };

    struct StubProvider(String);

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            &self.0
        }
        fn kind(&self) -> ProviderKind {
            ProviderKind::Anthropic
        }
        async fn dispatch(
            &self,
            _request: UpstreamHttpRequest,
            _ctx: DispatchContext,
        ) -> ProviderResult<UpstreamHttpResponse> {
            unimplemented!()
        }
    }

    fn provider_config(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            kind: ProviderKind::Anthropic,
            base_url: "https://example.test".to_string(),
            auth: AuthScheme::Passthrough,
            proxy_url: None,
            streaming_mode: StreamingMode::Auto,
            enabled: true,
        }
    }

    fn route(pattern: &str, provider_name: &str, priority: i32) -> ModelRouteConfig {
        ModelRouteConfig {
            pattern: pattern.to_string(),
            provider_name: provider_name.to_string(),
            upstream_model: "passthrough".to_string(),
            priority,
            enabled: true,
        }
    }

    fn build_registry(names: &[&str], routes: Vec<ModelRouteConfig>) -> ProviderRegistry {
        let document = RootDocument {
            providers: names.iter().map(|n| provider_config(n)).collect(),
            model_routes: routes,
            settings: Default::default(),
        };
        ProviderRegistry::new(
            &document,
            &|config: &ProviderConfig| {
                Arc::new(StubProvider(config.name.clone())) as Arc<dyn Provider>
            },
        )
    }

    #[test]
    fn priority_strategy_orders_ascending_by_priority() {
        let registry = build_registry(
            &["p1", "p2"],
            vec![route("m", "p2", 2), route("m", "p1", 1)],
        );
        let health = HealthTracker::new(3, Duration::from_secs(30), Duration::from_secs(300), true);
        let selector = RouteSelector::new(Duration::from_secs(60));
        let candidates = selector.select("m", &registry, &health, SelectionStrategy::Priority);
        assert_eq!(candidates[0].provider.config.name, "p1");
        assert_eq!(candidates[1].provider.config.name, "p2");
    }

    #[test]
    fn unhealthy_providers_are_dropped_from_candidates() {
        let registry = build_registry(
            &["p1", "p2"],
            vec![route("m", "p1", 1), route("m", "p2", 2)],
        );
        let health = HealthTracker::new(1, Duration::from_secs(30), Duration::from_secs(300), true);
        health.record_result("p1", crate::health::Outcome::Error);
        let selector = RouteSelector::new(Duration::from_secs(60));
        let candidates = selector.select("m", &registry, &health, SelectionStrategy::Priority);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].provider.config.name, "p2");
    }

    #[test]
    fn stickiness_moves_last_successful_provider_to_front() {
        let registry = build_registry(
            &["p1", "p2"],
            vec![route("m", "p1", 1), route("m", "p2", 2)],
        );
        let health = HealthTracker::new(3, Duration::from_secs(30), Duration::from_secs(300), true);
        let selector = RouteSelector::new(Duration::from_secs(60));
        selector.note_success("p2");
        let candidates = selector.select("m", &registry, &health, SelectionStrategy::Priority);
        assert_eq!(candidates[0].provider.config.name, "p2");
    }

    #[test]
    fn glob_pattern_matches_requested_model() {
        let registry = build_registry(&["p1"], vec![route("claude-3-5-*", "p1", 1)]);
        let health = HealthTracker::new(3, Duration::from_secs(30), Duration::from_secs(300), true);
        let selector = RouteSelector::new(Duration::from_secs(60));
        let candidates = selector.select(
            "claude-3-5-haiku-20241022",
            &registry,
            &health,
            SelectionStrategy::Priority,
        );
        assert_eq!(candidates.len(), 1);
    }
}
