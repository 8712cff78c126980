use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Cli;
use gproxy_core::bootstrap::{AppState, NoopTokenSource};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let document = gproxy_common::load_from_path(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    // OAuth token acquisition (device-flow UX, secure storage) is an
    // external collaborator (spec.md §1); this binary does not yet wire one
    // in, so OAuth-scheme providers surface `AuthorizationRequired` until a
    // real `TokenSource` is supplied here.
    let state = Arc::new(AppState::new(&document, Arc::new(NoopTokenSource)));

    let app = axum::Router::new()
        .merge(gproxy_core::handler::router(state.clone()))
        .merge(gproxy_admin::router(state.clone(), cli.config.clone()));

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "gproxy listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
