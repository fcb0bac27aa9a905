use anyhow::Context;

use bloxs_proxy::config::ProxyConfig;
use bloxs_proxy::native::{build_router, init_tracing, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = ProxyConfig::from_env()?;
    let state = AppState::new(cfg).map_err(|e| anyhow::anyhow!(e))?;

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(%addr, "bloxs-proxy listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
