use std::sync::Arc;

use anyhow::Context;
use harbor_server::config::ServerConfig;
use harbor_server::service::Service;
use harbor_server::{api, shutdown};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "harbor_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Harbor server...");

    let config = ServerConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    let bind_addr = config.bind_addr;

    let service = Arc::new(Service::in_memory(config));
    service.start();

    // Build router with all API endpoints
    let app = api::create_router(service.clone());

    tracing::info!("Listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;

    let shutdown = shutdown::install_shutdown_handler();
    let stopping = service.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            // Open streams watch the service token; cancel it before axum
            // waits on their connections.
            stopping.cancel();
        })
        .await
        .context("server error")?;

    service.close().await;
    tracing::info!("Harbor server stopped");

    Ok(())
}
