mod api_key;
mod auth;
mod config;
mod cpu_usage;
mod error;
mod prometheus;
mod proxy;
mod state;

use config::Config;
use state::AppState;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = Config::load()?;
    let state = Arc::new(AppState::from_config(&cfg)?);

    // Resolve the API key before accepting traffic; any file error is fatal
    state.auth.bootstrap()?;

    let app = proxy::router(state);

    let addr: SocketAddr = cfg.listen_addr().parse()?;
    info!(%addr, "Starting prom-proxy");

    let server = axum::Server::bind(&addr).serve(app.into_make_service());

    let graceful = server.with_graceful_shutdown(shutdown_signal());
    graceful.await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}
