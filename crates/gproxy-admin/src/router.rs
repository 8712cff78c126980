use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use gproxy_common::ProviderKind;
use gproxy_core::AppState;

/// Thin admin surface (spec.md §6, SPEC_FULL.md §4.9): liveness, the
/// registry snapshot, and a manual reload trigger. Everything heavier
/// (parsing, validation) is delegated to `gproxy_common::load_from_path`;
/// this crate only wires HTTP verbs to it.
#[derive(Clone)]
pub struct AdminState {
    app: Arc<AppState>,
    config_path: PathBuf,
}

pub fn router(app: Arc<AppState>, config_path: PathBuf) -> Router {
    let state = AdminState { app, config_path };
    Router::new()
        .route("/", get(liveness))
        .route("/healthz", get(liveness))
        .route("/providers", get(list_providers))
        .route("/providers/reload", post(reload))
        .with_state(state)
}

async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct ProviderView {
    name: String,
    kind: &'static str,
    base_url: String,
    enabled: bool,
    healthy: bool,
    consecutive_errors: u32,
    last_error_seconds_ago: Option<f64>,
}

/// Reads the raw registry snapshot (disabled providers included) rather than
/// the routing-visible `list()`/`by_name()` view, so an operator can see why
/// a provider is absent from routing (spec.md §4.1).
async fn list_providers(State(state): State<AdminState>) -> impl IntoResponse {
    let configs = state.app.registry.all_configs();
    let views: Vec<ProviderView> = configs
        .into_iter()
        .map(|config| {
            let status = state.app.health.status(&config.name);
            let healthy = config.enabled && state.app.health.is_healthy(&config.name);
            ProviderView {
                kind: match config.kind {
                    ProviderKind::Anthropic => "anthropic",
                    ProviderKind::OpenAiCompatible => "openai_compatible",
                },
                name: config.name,
                base_url: config.base_url,
                enabled: config.enabled,
                healthy,
                consecutive_errors: status.consecutive_errors,
                last_error_seconds_ago: status.last_error_time.map(|t| t.elapsed().as_secs_f64()),
            }
        })
        .collect();
    Json(serde_json::json!({ "providers": views }))
}

/// Re-reads the config file this process was started with and atomically
/// swaps the Provider Registry snapshot. A parse/validation failure leaves
/// the previous snapshot intact (spec.md §4.1) and is reported as 400.
async fn reload(State(state): State<AdminState>) -> impl IntoResponse {
    match gproxy_common::load_from_path(&state.config_path) {
        Ok(document) => {
            state.app.reload(&document);
            (StatusCode::OK, Json(serde_json::json!({ "reloaded": true }))).into_response()
        }
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "type": "error",
                "error": { "type": "invalid_request_error", "message": err.to_string() },
            })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use gproxy_common::{AuthScheme, RootDocument, Settings, StreamingMode};
    use gproxy_provider_core::TokenSource;
    use tower::ServiceExt;

    struct NoToken;
    #[async_trait::async_trait]
    impl TokenSource for NoToken {
        async fn current_token(&self, _provider_name: &str) -> Option<String> {
            None
        }
    }

    fn sample_document() -> RootDocument {
        RootDocument {
            providers: vec![gproxy_common::ProviderConfig {
                name: "p1".to_string(),
                kind: ProviderKind::Anthropic,
                base_url: "https://example.test".to_string(),
                auth: AuthScheme::Passthrough,
                proxy_url: None,
                streaming_mode: StreamingMode::Auto,
                enabled: true,
            }],
            model_routes: vec![],
            settings: Settings::default(),
        }
    }

    #[tokio::test]
    async fn liveness_returns_200() {
        let state = Arc::new(AppState::new(&sample_document(), Arc::new(NoToken)));
        let app = router(state, PathBuf::from("does-not-matter.yaml"));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn providers_endpoint_lists_configured_provider() {
        let state = Arc::new(AppState::new(&sample_document(), Arc::new(NoToken)));
        let app = router(state, PathBuf::from("does-not-matter.yaml"));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/providers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
