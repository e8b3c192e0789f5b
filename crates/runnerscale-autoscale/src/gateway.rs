//! Persistence of patch intents.

use runnerscale_state::{StateResult, StateStore};

use crate::engine::{StatusPatch, TargetPatch};

/// Applies patch intents with optimistic concurrency.
///
/// Each write carries the resource version the decision was made from and
/// must fail with [`StateError::Conflict`](runnerscale_state::StateError::Conflict)
/// if the stored resource has moved on. Re-applying the same patch to the
/// same version is harmless.
pub trait PersistenceGateway: Send + Sync {
    fn apply_target_patch(
        &self,
        target_key: &str,
        expected_version: u64,
        patch: &TargetPatch,
    ) -> StateResult<()>;

    fn apply_status_patch(
        &self,
        autoscaler_key: &str,
        expected_version: u64,
        patch: &StatusPatch,
    ) -> StateResult<()>;
}

impl PersistenceGateway for StateStore {
    fn apply_target_patch(
        &self,
        target_key: &str,
        expected_version: u64,
        patch: &TargetPatch,
    ) -> StateResult<()> {
        self.update_deployment_replicas(target_key, expected_version, patch.replicas)?;
        Ok(())
    }

    fn apply_status_patch(
        &self,
        autoscaler_key: &str,
        expected_version: u64,
        patch: &StatusPatch,
    ) -> StateResult<()> {
        self.update_autoscaler_status(autoscaler_key, expected_version, &patch.status)?;
        Ok(())
    }
}
