//! oscqueryd: serves an OSCQuery namespace from a config file and advertises it.

use anyhow::{Context, Result};

use oscquery::{Access, OscQueryService, OscValue};
use oscquery_core::config::{EndpointConfig, OscQueryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = OscQueryConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = OscQueryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        OscQueryConfig::default()
    });
    tracing::info!(
        name = %config.service.name,
        ip = %config.service.host_ip,
        endpoints = config.endpoints.len(),
        "oscqueryd starting"
    );

    let service = OscQueryService::from_config(&config).context("failed to start discovery")?;

    for endpoint in &config.endpoints {
        if let Err(e) = register(&service, endpoint) {
            tracing::warn!(path = %endpoint.path, error = %e, "skipping endpoint");
        }
    }

    let port = service
        .start_http(config.service.http_port, config.service.advertise)
        .await
        .context("failed to start HTTP server")?;
    tracing::info!(port, "serving OSCQuery");

    if config.service.osc_port != 0 {
        service
            .advertise_osc(config.service.osc_port)
            .context("failed to advertise OSC service")?;
    }

    // Log peers as they come and go.
    let mut added = service.subscribe_any();
    let mut removed = service.subscribe_removed();
    let peer_log = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(peer) = added.recv() => tracing::info!(peer = %peer, "peer up"),
                Some(peer) = removed.recv() => tracing::info!(peer = %peer, "peer down"),
                else => break,
            }
        }
    });

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");

    service.shutdown().await;
    peer_log.abort();
    Ok(())
}

/// Add one configured endpoint to the tree.
fn register(service: &OscQueryService, endpoint: &EndpointConfig) -> Result<()> {
    let access: Access = endpoint
        .access
        .parse()
        .with_context(|| format!("bad access mode {:?}", endpoint.access))?;
    let value = endpoint
        .value
        .clone()
        .map(serde_json::from_value::<Vec<OscValue>>)
        .transpose()
        .context("value must be a JSON array")?;

    service.add_endpoint(
        &endpoint.path,
        &endpoint.osc_type,
        access,
        value,
        &endpoint.description,
    )?;
    Ok(())
}
