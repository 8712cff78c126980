use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use gproxy_common::{ProviderConfig, RootDocument, Settings};
use gproxy_provider_core::{Provider, TokenSource};
use gproxy_provider_impl::{ClientTimeouts, HttpProvider, WreqProviderClient};

use crate::dedup::DeduplicationIndex;
use crate::health::HealthTracker;
use crate::orchestrator::RequestOrchestrator;
use crate::registry::{ProviderFactory, ProviderRegistry};
use crate::selector::RouteSelector;

/// A `TokenSource` that never has a token. OAuth device-flow acquisition and
/// secure storage live entirely outside the core (spec.md §1); wiring in a
/// real implementation is the binary's job. Requests against an OAuth
/// provider surface `AuthorizationRequired` until one is supplied.
pub struct NoopTokenSource;

#[async_trait]
impl TokenSource for NoopTokenSource {
    async fn current_token(&self, _provider_name: &str) -> Option<String> {
        None
    }
}

/// Everything a running process needs to serve requests, built once from a
/// loaded config document and handed to both the client-facing and admin
/// routers.
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub health: Arc<HealthTracker>,
    pub selector: Arc<RouteSelector>,
    pub dedup: Arc<DeduplicationIndex>,
    pub orchestrator: Arc<RequestOrchestrator>,
    pub settings: Arc<ArcSwap<Settings>>,
    client: Arc<WreqProviderClient>,
}

impl AppState {
    /// Builds the whole dependency graph from a loaded config document
    /// (`gproxy_common::RootDocument`), mirroring
    /// `gproxy-core/src/core.rs::Core::new`'s role in the teacher: this is
    /// the one place the free-standing crates get wired into a process.
    pub fn new(document: &RootDocument, token_source: Arc<dyn TokenSource>) -> Self {
        let client = Arc::new(WreqProviderClient::new(ClientTimeouts::default()));
        let registry = Arc::new(ProviderRegistry::new(document, &provider_factory(&client)));
        let health = Arc::new(HealthTracker::new(
            document.settings.unhealthy_threshold,
            Duration::from_secs(document.settings.failure_cooldown_secs),
            Duration::from_secs(document.settings.unhealthy_reset_timeout_secs),
            document.settings.unhealthy_reset_on_success,
        ));
        let selector = Arc::new(RouteSelector::new(Duration::from_secs(
            document.settings.sticky_provider_duration_secs,
        )));
        let dedup = Arc::new(DeduplicationIndex::new(Duration::from_secs_f64(
            document.settings.deduplication.sse_error_cleanup_delay_secs,
        )));
        let settings = Arc::new(ArcSwap::from_pointee(document.settings.clone()));
        let orchestrator = Arc::new(RequestOrchestrator::new(
            registry.clone(),
            health.clone(),
            selector.clone(),
            dedup.clone(),
            settings.clone(),
            token_source,
        ));

        Self {
            registry,
            health,
            selector,
            dedup,
            orchestrator,
            settings,
            client,
        }
    }

    /// Re-reads a config document and atomically swaps the Provider
    /// Registry's snapshot (spec.md §4.1) and the `Settings` the orchestrator
    /// reads per-request (`selection_strategy`, `failover_http_codes`, …).
    /// Health, selector stickiness, and in-flight deduplication entries are
    /// left untouched — a reload only ever changes which providers exist and
    /// which settings apply, not the bookkeeping about them.
    pub fn reload(&self, document: &RootDocument) {
        self.registry.reload(document, &provider_factory(&self.client));
        self.settings.store(Arc::new(document.settings.clone()));
    }
}

fn provider_factory(client: &Arc<WreqProviderClient>) -> Box<ProviderFactory> {
    let client = client.clone();
    Box::new(move |config: &ProviderConfig| {
        Arc::new(HttpProvider::new(
            config.name.clone(),
            config.kind,
            config.proxy_url.clone(),
            client.clone(),
        )) as Arc<dyn Provider>
    })
}
