use anyhow::Context;
use kube::Client;
use launchpad_operator::{config::OperatorConfig, controller, logging::init_logging, telemetry};
use std::net::SocketAddr;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::load()?;
    init_logging(&config.log_level, config.log_format)?;
    info!(base_domain=%config.base_domain, registry=%config.registry_prefix, tls_issuer=?config.tls_issuer, "operator starting");

    let client = Client::try_default().await.context("failed to build kube client")?;

    let addr: SocketAddr = config.metrics_addr.parse().with_context(|| format!("invalid metrics_addr {:?}", config.metrics_addr))?;
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("bind {addr}"))?;
    info!(%addr, "metrics listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, telemetry::router()).await {
            error!(error=%e, "metrics.server.failed");
        }
    });

    controller::run(client, config).await;
    info!("operator stopped");
    Ok(())
}
