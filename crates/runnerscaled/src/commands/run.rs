use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use runnerscale_autoscale::{Controller, Reconciler, SnapshotEvaluator};
use runnerscale_core::{ControllerSettings, RunnerscaleConfig, parse_duration};

use super::open_store;

/// Resolve controller settings, applying the `--sync-interval` override.
pub fn settings(
    config: &RunnerscaleConfig,
    sync_interval: Option<&str>,
) -> anyhow::Result<ControllerSettings> {
    let mut settings = config.controller_settings()?;
    if let Some(raw) = sync_interval {
        let interval =
            parse_duration(raw).with_context(|| format!("invalid --sync-interval {raw:?}"))?;
        if interval.is_zero() {
            anyhow::bail!("--sync-interval must be greater than zero");
        }
        settings.sync_interval = interval;
    }
    Ok(settings)
}

pub async fn run(
    config: &RunnerscaleConfig,
    data_dir: &Path,
    sync_interval: Option<&str>,
) -> anyhow::Result<()> {
    let settings = settings(config, sync_interval)?;
    info!(?settings, "runnerscale daemon starting");

    let state = open_store(data_dir)?;
    let evaluator =
        SnapshotEvaluator::new(state.clone()).with_staleness(settings.demand_staleness);
    let reconciler = Reconciler::new(state, Arc::new(evaluator), &settings);
    let mut controller = Controller::new(reconciler, &settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller_handle = tokio::spawn(async move {
        controller.run(shutdown_rx).await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C, shutting down");
    } else {
        info!("shutdown signal received");
    }
    let _ = shutdown_tx.send(true);

    controller_handle.await.context("controller task panicked")?;
    info!("runnerscale daemon stopped");
    Ok(())
}
