//! Reconciler: one decide-and-persist pass for one autoscaler.
//!
//! Loads the autoscaler and its target from the state store, runs the
//! [`DecisionEngine`], and hands the resulting patches to the
//! [`PersistenceGateway`]: target first, status second. Missing or deleting
//! resources are skipped. Write conflicts are returned to the caller, which
//! re-runs the whole pass from a fresh read.

use std::sync::Arc;

use tracing::{info, warn};

use runnerscale_core::ControllerSettings;
use runnerscale_state::{
    Event, EventType, HorizontalRunnerAutoscaler, StateError, StateStore, Timestamp,
};

use crate::engine::{Decision, DecisionEngine};
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::evaluator::DemandEvaluator;
use crate::gateway::PersistenceGateway;

pub const REASON_AUTOSCALING_FAILURE: &str = "RunnerAutoscalingFailure";
pub const REASON_AUTOSCALED: &str = "RunnerAutoscaled";

/// Why a reconcile pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AutoscalerNotFound,
    AutoscalerDeleting,
    TargetNotFound,
    TargetDeleting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    Applied(Decision),
}

pub struct Reconciler {
    state: StateStore,
    gateway: Arc<dyn PersistenceGateway>,
    evaluator: Arc<dyn DemandEvaluator>,
    engine: DecisionEngine,
}

impl Reconciler {
    /// Create a reconciler that reads from and writes to `state`.
    pub fn new(
        state: StateStore,
        evaluator: Arc<dyn DemandEvaluator>,
        settings: &ControllerSettings,
    ) -> Self {
        Self {
            gateway: Arc::new(state.clone()),
            state,
            evaluator,
            engine: DecisionEngine::new(settings),
        }
    }

    /// Route writes through a different gateway.
    pub fn with_gateway(mut self, gateway: Arc<dyn PersistenceGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Run one pass for the autoscaler stored at `key`.
    pub fn reconcile(&self, key: &str, now: Timestamp) -> AutoscaleResult<ReconcileOutcome> {
        let Some(hra) = self.state.get_autoscaler(key)? else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::AutoscalerNotFound));
        };
        if hra.metadata.is_deleting() {
            return Ok(ReconcileOutcome::Skipped(SkipReason::AutoscalerDeleting));
        }

        let target_key = hra.target_key();
        let Some(target) = self.state.get_deployment(&target_key)? else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::TargetNotFound));
        };
        if target.metadata.is_deleting() {
            return Ok(ReconcileOutcome::Skipped(SkipReason::TargetDeleting));
        }

        let decision = match self.engine.decide(&hra, &target, self.evaluator.as_ref(), now) {
            Ok(decision) => decision,
            Err(source) => {
                warn!(autoscaler = %key, error = %source, "could not compute replicas");
                self.record(
                    &hra,
                    EventType::Warning,
                    REASON_AUTOSCALING_FAILURE,
                    source.to_string(),
                    now,
                );
                return Err(AutoscaleError::Evaluator {
                    autoscaler: key.to_string(),
                    source,
                });
            }
        };

        if let Some(patch) = &decision.target_patch {
            match self
                .gateway
                .apply_target_patch(&target_key, target.metadata.resource_version, patch)
            {
                Ok(()) => {}
                Err(StateError::NotFound(_)) => {
                    return Ok(ReconcileOutcome::Skipped(SkipReason::TargetNotFound));
                }
                Err(e) => return Err(write_error(&target_key, e)),
            }
            info!(
                autoscaler = %key,
                deployment = %target_key,
                from = target.replicas(),
                to = patch.replicas,
                "scaled runner deployment"
            );
            self.record(
                &hra,
                EventType::Normal,
                REASON_AUTOSCALED,
                format!(
                    "scaled {} from {} to {} replicas",
                    target_key,
                    target.replicas(),
                    patch.replicas
                ),
                now,
            );
        }

        // A failure here after a successful target write is reconciled by
        // the next pass.
        if let Some(patch) = &decision.status_patch {
            match self
                .gateway
                .apply_status_patch(key, hra.metadata.resource_version, patch)
            {
                Ok(()) => {}
                Err(StateError::NotFound(_)) => {
                    return Ok(ReconcileOutcome::Skipped(SkipReason::AutoscalerNotFound));
                }
                Err(e) => return Err(write_error(key, e)),
            }
        }

        Ok(ReconcileOutcome::Applied(decision))
    }

    /// Events are best effort; failing to record one never fails the pass.
    fn record(
        &self,
        hra: &HorizontalRunnerAutoscaler,
        event_type: EventType,
        reason: &str,
        message: String,
        now: Timestamp,
    ) {
        let event = Event {
            object_key: hra.table_key(),
            event_type,
            reason: reason.to_string(),
            message,
            timestamp: now,
        };
        if let Err(e) = self.state.record_event(&event) {
            warn!(autoscaler = %event.object_key, %reason, error = %e, "failed to record event");
        }
    }
}

fn write_error(key: &str, e: StateError) -> AutoscaleError {
    if e.is_conflict() {
        AutoscaleError::WriteConflict {
            key: key.to_string(),
        }
    } else {
        AutoscaleError::State(e)
    }
}
