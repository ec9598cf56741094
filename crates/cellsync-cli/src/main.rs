//! Cellsync client binary
//!
//! Registers one cell with a loopback kernel, runs it, optionally edits and
//! re-runs it, interrupts the kernel and finally closes the channel.

mod config;
mod kernel;

use std::sync::Arc;
use std::time::Duration;

use cellsync_protocols::{CellController, CellStatus, ChannelConfig, SharedChannel};
use tokio::sync::{oneshot, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ClientConfig;
use crate::kernel::LoopbackKernel;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cellsync=info,cellsync_protocols=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env();
    tracing::info!("Starting cellsync with {:?}", config);

    let (channel, endpoint) =
        SharedChannel::new(ChannelConfig::default().with_inbound_capacity(config.channel_capacity));

    let mut kernel = LoopbackKernel::new(endpoint, config.kernel_delay);
    kernel.register(&config.code);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let kernel_task = tokio::spawn(kernel.run(shutdown_rx));

    let cell = Arc::new(CellController::new(channel, config.code.clone()));
    let cell_task = tokio::spawn({
        let cell = Arc::clone(&cell);
        async move { cell.run().await }
    });
    tracing::info!("Cell {} registered", cell.identity());

    let mut status = cell.subscribe_status();
    let mut output = cell.subscribe_output();

    run_cell(&cell, &mut output, &mut status, config.wait).await?;
    tracing::info!("Output: {}", cell.output());

    if let Some(new_code) = &config.set_code {
        cell.set_code(new_code.clone());
        run_cell(&cell, &mut output, &mut status, config.wait).await?;
        tracing::info!("Output after edit: {}", cell.output());
        tracing::info!("Identity unchanged: {}", cell.identity());
    }

    cell.interrupt();
    wait_status(&mut status, CellStatus::Stopped, config.wait).await?;
    tracing::info!("Cell status after interrupt: {}", cell.status());

    // Kernel closes the channel on shutdown.
    let _ = shutdown_tx.send(());
    wait_status(&mut status, CellStatus::Disconnected, config.wait).await?;
    tracing::info!("Cell status after close: {}", cell.status());

    tracing::info!("Final state: {}", serde_json::to_string(&cell.snapshot())?);

    kernel_task.await?;
    cell_task.abort();

    Ok(())
}

/// Evaluate and wait for the fresh output and the final `idle`.
async fn run_cell(
    cell: &CellController<SharedChannel>,
    output: &mut watch::Receiver<String>,
    status: &mut watch::Receiver<CellStatus>,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    cell.evaluate();
    tokio::time::timeout(wait, output.wait_for(|o| !o.is_empty())).await??;
    wait_status(status, CellStatus::Idle, wait).await
}

async fn wait_status(
    status: &mut watch::Receiver<CellStatus>,
    target: CellStatus,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    tokio::time::timeout(wait, status.wait_for(|s| *s == target)).await??;
    Ok(())
}
