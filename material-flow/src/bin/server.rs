//! Material-flow service binary
//!
//! Opens the ledger, runs the periodic pending-batch sweep, and idles until
//! interrupted. The HTTP/web surface lives in the application layer above.

use material_flow::{FlowConfig, MaterialFlow};
use std::sync::Arc;
use std::time::Duration;

/// How often pending batches are re-checked for allocation
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting RegenWorks material-flow server");

    let config = FlowConfig::from_env()?;
    let flow = Arc::new(MaterialFlow::new(config)?);

    let stats = flow.ledger().storage().stats()?;
    tracing::info!(
        entries = stats.total_entries,
        projects = stats.total_projects,
        batches = stats.total_batches,
        "Ledger opened"
    );

    let sweeper = flow.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match sweeper.process_pending_batches().await {
                Ok(0) => {}
                Ok(linked) => tracing::info!(linked, "Sweep allocated pending batches"),
                Err(e) => tracing::warn!(error = %e, "Pending-batch sweep failed"),
            }
        }
    });

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down material-flow server");
    Ok(())
}
