use std::path::Path;

use tracing::info;

use runnerscale_state::StateStore;

use crate::manifest::Manifest;

/// Counts of resources written by one apply.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub autoscalers: usize,
    pub deployments: usize,
}

pub fn apply(state: &StateStore, file: &Path) -> anyhow::Result<()> {
    let manifest = Manifest::from_file(file)?;
    let summary = apply_manifest(state, manifest)?;
    println!(
        "applied {} autoscaler(s) and {} deployment(s)",
        summary.autoscalers, summary.deployments
    );
    Ok(())
}

/// Upsert every resource in `manifest`.
///
/// An existing autoscaler keeps its status, so re-applying a manifest does
/// not drop the decision cache. An existing deployment keeps its replica
/// count unless the manifest sets one.
pub fn apply_manifest(state: &StateStore, manifest: Manifest) -> anyhow::Result<ApplySummary> {
    let mut summary = ApplySummary::default();

    for mut rd in manifest.deployments {
        let key = rd.table_key();
        if rd.spec.replicas.is_none()
            && let Some(existing) = state.get_deployment(&key)?
        {
            rd.spec.replicas = existing.spec.replicas;
        }
        let stored = state.put_deployment(&rd)?;
        info!(deployment = %key, version = stored.metadata.resource_version, "deployment applied");
        summary.deployments += 1;
    }

    for mut hra in manifest.autoscalers {
        let key = hra.table_key();
        if let Some(existing) = state.get_autoscaler(&key)? {
            hra.status = existing.status;
        }
        let stored = state.put_autoscaler(&hra)?;
        info!(autoscaler = %key, version = stored.metadata.resource_version, "autoscaler applied");
        summary.autoscalers += 1;
    }

    Ok(summary)
}
