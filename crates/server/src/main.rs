mod bootstrap;
mod health;
mod tools;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use toolrelay_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use toolrelay_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.supervisor.status(),
        &app.config.orchestrator.worker_name,
    )
    .await?;

    let shutdown = CancellationToken::new();
    let supervisor_task = tokio::spawn({
        let supervisor = Arc::clone(&app.supervisor);
        let shutdown = shutdown.clone();
        async move { supervisor.run(shutdown).await }
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        transport_mode = app.transport_mode,
        worker_name = %app.config.orchestrator.worker_name,
        "toolrelay-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = app.config.server.graceful_shutdown_secs,
        "toolrelay-server stopping"
    );

    shutdown.cancel();
    supervisor_task.await?;

    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "toolrelay-server stopped"
    );
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
