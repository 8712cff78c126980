use std::sync::Arc;

use async_trait::async_trait;
use gproxy_common::ProviderKind;
use gproxy_provider_core::{DispatchContext, Provider, ProviderResult, UpstreamHttpRequest, UpstreamHttpResponse};

use crate::client::WreqProviderClient;

/// A `Provider` backed by a plain HTTP endpoint. Both Anthropic-native and
/// OpenAI-compatible upstreams are this same shape: format translation
/// happens above this seam, so there is nothing kind-specific left to do
/// here beyond remembering which kind this endpoint is and which outbound
/// proxy (if any) to use. The client is shared (`Arc`) across every
/// `HttpProvider` built by the same factory so the per-proxy connection pool
/// cache in `WreqProviderClient` is reused instead of rebuilt per provider.
pub struct HttpProvider {
    name: String,
    kind: ProviderKind,
    proxy_url: Option<String>,
    client: Arc<WreqProviderClient>,
}

impl HttpProvider {
    pub fn new(
        name: impl Into<String>,
        kind: ProviderKind,
        proxy_url: Option<String>,
        client: Arc<WreqProviderClient>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            proxy_url,
            client,
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn dispatch(
        &self,
        request: UpstreamHttpRequest,
        _ctx: DispatchContext,
    ) -> ProviderResult<UpstreamHttpResponse> {
        self.client.send(request, self.proxy_url.as_deref()).await
    }
}
