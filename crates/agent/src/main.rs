//! `printlink-agent` -- print-job agent daemon.
//!
//! Keeps a WebSocket connection to the control plane, runs every job the
//! control plane asks for through the local CUPS printer, and reports
//! per-job state back over the same connection.
//!
//! See [`AgentConfig::from_env`] for the environment variables.

use std::sync::Arc;

use printlink_agent::agent::Agent;
use printlink_agent::config::AgentConfig;
use printlink_agent::connection::ConnectionManager;
use printlink_agent::fetcher::HttpPayloadSource;
use printlink_agent::pipeline::PipelineContext;
use printlink_device::CupsDevice;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "printlink_agent=info,printlink_device=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let socket_url = config.socket_url();
    tracing::info!(
        base_url = %config.base_url,
        printer = %config.printer_name,
        content_type = %config.content_type,
        "Starting printlink-agent",
    );

    let ctx = PipelineContext {
        source: Arc::new(HttpPayloadSource::new(
            config.base_url.clone(),
            config.token.clone(),
        )),
        device: Arc::new(CupsDevice::new(config.printer_name.clone())),
        content_type: config.content_type.clone(),
        timings: config.timings.clone(),
    };

    let agent = Agent::new(ctx);
    let connection = ConnectionManager::new(
        socket_url,
        config.token.clone(),
        config.timings.reconnect_delay,
        agent.handle(),
    );

    let cancel = CancellationToken::new();
    let agent_task = tokio::spawn(agent.run(cancel.child_token()));
    let connection_task = tokio::spawn(connection.run(cancel.child_token()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested");
    cancel.cancel();

    let _ = connection_task.await;
    let _ = agent_task.await;
    tracing::info!("printlink-agent stopped");
}
