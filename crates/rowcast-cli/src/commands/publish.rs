//! Publish command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use rowcast_core::{Config, Publisher, RunSummary};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Run the publisher once.
pub async fn run(config: Config) -> Result<RunSummary> {
    info!(
        endpoint = %config.sink.endpoint(),
        event_type = %config.event.event_type,
        "Starting publisher"
    );

    let http_port = config.monitoring.http_port;

    let mut publisher = Publisher::new(config).await?;
    let shutdown_tx = publisher.shutdown_signal();

    let server = http_port.map(|port| {
        let state = Arc::new(ServerState {
            health: publisher.health(),
            metrics: publisher.metrics(),
        });
        tokio::spawn(start_server(state, port, shutdown_tx.subscribe()))
    });

    let signals = tokio::spawn(wait_for_signal(shutdown_tx.clone()));

    let result = publisher.run().await;

    signals.abort();
    if let Some(server) = server {
        let _ = shutdown_tx.send(());
        let _ = server.await;
    }

    let summary = result?;
    if summary.interrupted {
        warn!(rows_read = summary.rows_read, "Publisher interrupted");
    } else {
        info!("Publisher finished");
    }
    Ok(summary)
}

/// Forward the first SIGINT or SIGTERM to the publisher.
async fn wait_for_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), finishing in-flight delivery");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, finishing in-flight delivery");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), finishing in-flight delivery");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, finishing in-flight delivery");
    }

    let _ = shutdown_tx.send(());
}
