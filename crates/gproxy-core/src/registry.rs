use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use gproxy_common::{ModelRouteConfig, ProviderConfig, RootDocument};
use gproxy_provider_core::Provider;

pub struct ProviderEntry {
    pub config: ProviderConfig,
    pub provider: Arc<dyn Provider>,
}

struct Snapshot {
    providers: Vec<Arc<ProviderEntry>>,
    by_name: HashMap<String, usize>,
    routes: Vec<ModelRouteConfig>,
    /// Every configured provider, enabled or not — unlike `providers`, which
    /// only holds ones a `Provider` instance was built for. The admin
    /// `/providers` view reads this one (spec.md §6, SPEC_FULL.md §4.1).
    all_configs: Vec<ProviderConfig>,
}

/// In-memory set of provider descriptors (spec.md §4.1). Reload swaps the
/// whole snapshot atomically; in-flight requests keep using the `Arc` they
/// already hold, so a reload never observes a torn read.
pub struct ProviderRegistry {
    snapshot: ArcSwap<Snapshot>,
}

pub type ProviderFactory = dyn Fn(&ProviderConfig) -> Arc<dyn Provider> + Send + Sync;

impl ProviderRegistry {
    pub fn new(document: &RootDocument, factory: &ProviderFactory) -> Self {
        let snapshot = build_snapshot(document, factory);
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    /// Atomically replaces the registry contents. Providers disabled in
    /// config are simply omitted from the new snapshot, not retained as
    /// unhealthy entries.
    pub fn reload(&self, document: &RootDocument, factory: &ProviderFactory) {
        let snapshot = build_snapshot(document, factory);
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn list(&self) -> Vec<Arc<ProviderEntry>> {
        self.snapshot.load().providers.clone()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<ProviderEntry>> {
        let snapshot = self.snapshot.load();
        snapshot
            .by_name
            .get(name)
            .map(|&idx| snapshot.providers[idx].clone())
    }

    pub fn routes(&self) -> Vec<ModelRouteConfig> {
        self.snapshot.load().routes.clone()
    }

    /// Every configured provider, including disabled ones, for the admin
    /// `/providers` view (SPEC_FULL.md §4.1). `list()`/`by_name()` stay
    /// enabled-only for request routing.
    pub fn all_configs(&self) -> Vec<ProviderConfig> {
        self.snapshot.load().all_configs.clone()
    }
}

fn build_snapshot(document: &RootDocument, factory: &ProviderFactory) -> Snapshot {
    let mut providers = Vec::new();
    let mut by_name = HashMap::new();
    for config in &document.providers {
        if !config.enabled {
            continue;
        }
        let provider = factory(config);
        by_name.insert(config.name.clone(), providers.len());
        providers.push(Arc::new(ProviderEntry {
            config: config.clone(),
            provider,
        }));
    }
    Snapshot {
        providers,
        by_name,
        routes: document.model_routes.clone(),
        all_configs: document.providers.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gproxy_common::{AuthScheme, ProviderKind, StreamingMode};
    use gproxy_provider_core::{
        DispatchContext, ProviderResult, UpstreamHttpRequest, UpstreamHttpResponse,
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

    fn factory() -> Box<ProviderFactory> {
        Box::new(|config: &ProviderConfig| {
            Arc::new(StubProvider(config.name.clone())) as Arc<dyn Provider>
        })
    }

    fn provider_config(name: &str, enabled: bool) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            kind: ProviderKind::Anthropic,
            base_url: "https://example.test".to_string(),
            auth: AuthScheme::Passthrough,
            proxy_url: None,
            streaming_mode: StreamingMode::Auto,
            enabled,
        }
    }

    #[test]
    fn disabled_providers_are_omitted() {
        let document = RootDocument {
            providers: vec![provider_config("p1", true), provider_config("p2", false)],
            model_routes: vec![],
            settings: Default::default(),
        };
        let registry = ProviderRegistry::new(&document, &*factory());
        assert_eq!(registry.list().len(), 1);
        assert!(registry.by_name("p2").is_none());
    }

    #[test]
    fn reload_replaces_the_snapshot_atomically() {
        let document = RootDocument {
            providers: vec![provider_config("p1", true)],
            model_routes: vec![],
            settings: Default::default(),
        };
        let registry = ProviderRegistry::new(&document, &*factory());
        let held = registry.by_name("p1").unwrap();

        let reloaded = RootDocument {
            providers: vec![provider_config("p2", true)],
            model_routes: vec![],
            settings: Default::default(),
        };
        registry.reload(&reloaded, &*factory());

        assert!(registry.by_name("p1").is_none());
        assert!(registry.by_name("p2").is_some());
        assert_eq!(held.config.name, "p1");
    }
}
