//! Demand evaluation: the raw replica suggestion fed into the engine.
//!
//! The engine treats evaluation as opaque: anything implementing
//! [`DemandEvaluator`] can be plugged in. [`SnapshotEvaluator`] is the
//! built-in implementation and scales on the latest [`DemandSnapshot`]
//! recorded in the state store.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use runnerscale_core::config::DEFAULT_DEMAND_STALENESS;
use runnerscale_state::{
    DemandSnapshot, HorizontalRunnerAutoscaler, MetricSpec, RunnerDeployment, StateError,
    StateStore, Timestamp,
};

use crate::epoch_secs;

const DEFAULT_SCALE_UP_THRESHOLD: f64 = 0.8;
const DEFAULT_SCALE_DOWN_THRESHOLD: f64 = 0.3;
const DEFAULT_SCALE_UP_FACTOR: f64 = 1.3;
const DEFAULT_SCALE_DOWN_FACTOR: f64 = 0.7;

/// Why a replica suggestion could not be produced.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("no metrics configured")]
    NoMetrics,

    #[error("invalid metric: {0}")]
    InvalidMetric(String),

    #[error("no demand recorded for {0}")]
    NoDemand(String),

    #[error("demand for {key} is stale (observed at {observed_at}, now {now})")]
    StaleDemand {
        key: String,
        observed_at: Timestamp,
        now: Timestamp,
    },

    #[error("demand source unavailable: {0}")]
    Unavailable(String),
}

impl From<StateError> for EvaluatorError {
    fn from(e: StateError) -> Self {
        EvaluatorError::Unavailable(e.to_string())
    }
}

/// Produces a candidate replica count for a runner deployment.
pub trait DemandEvaluator: Send + Sync {
    fn evaluate(
        &self,
        target: &RunnerDeployment,
        autoscaler: &HorizontalRunnerAutoscaler,
    ) -> Result<u32, EvaluatorError>;
}

impl<F> DemandEvaluator for F
where
    F: Fn(&RunnerDeployment, &HorizontalRunnerAutoscaler) -> Result<u32, EvaluatorError>
        + Send
        + Sync,
{
    fn evaluate(
        &self,
        target: &RunnerDeployment,
        autoscaler: &HorizontalRunnerAutoscaler,
    ) -> Result<u32, EvaluatorError> {
        self(target, autoscaler)
    }
}

type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Evaluates the autoscaler's first metric against the stored demand snapshot.
pub struct SnapshotEvaluator {
    state: StateStore,
    staleness: Duration,
    clock: Clock,
}

impl SnapshotEvaluator {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            staleness: DEFAULT_DEMAND_STALENESS,
            clock: Arc::new(epoch_secs),
        }
    }

    /// Reject snapshots older than `staleness`.
    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    /// Replace the wall clock (for testing).
    pub fn with_clock(mut self, clock: impl Fn() -> Timestamp + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn load_snapshot(&self, key: &str) -> Result<DemandSnapshot, EvaluatorError> {
        let snapshot = self
            .state
            .get_demand(key)?
            .ok_or_else(|| EvaluatorError::NoDemand(key.to_string()))?;
        let now = (self.clock)();
        if snapshot.observed_at.saturating_add(self.staleness.as_secs()) < now {
            return Err(EvaluatorError::StaleDemand {
                key: key.to_string(),
                observed_at: snapshot.observed_at,
                now,
            });
        }
        Ok(snapshot)
    }
}

impl DemandEvaluator for SnapshotEvaluator {
    fn evaluate(
        &self,
        target: &RunnerDeployment,
        autoscaler: &HorizontalRunnerAutoscaler,
    ) -> Result<u32, EvaluatorError> {
        let metric = autoscaler
            .spec
            .metrics
            .first()
            .ok_or(EvaluatorError::NoMetrics)?;
        let key = target.table_key();
        let snapshot = self.load_snapshot(&key)?;

        let suggested = match metric {
            MetricSpec::TotalNumberOfQueuedAndInProgressWorkflowRuns => {
                snapshot.queued.saturating_add(snapshot.in_progress)
            }
            MetricSpec::PercentageRunnersBusy {
                scale_up_threshold,
                scale_down_threshold,
                scale_up_factor,
                scale_down_factor,
            } => busy_ratio_replicas(
                target.replicas(),
                &snapshot,
                BusyRatioPolicy {
                    scale_up_threshold: scale_up_threshold.unwrap_or(DEFAULT_SCALE_UP_THRESHOLD),
                    scale_down_threshold: scale_down_threshold
                        .unwrap_or(DEFAULT_SCALE_DOWN_THRESHOLD),
                    scale_up_factor: scale_up_factor.unwrap_or(DEFAULT_SCALE_UP_FACTOR),
                    scale_down_factor: scale_down_factor.unwrap_or(DEFAULT_SCALE_DOWN_FACTOR),
                },
            )?,
        };

        let min = autoscaler.spec.min_replicas.unwrap_or(1);
        let mut clamped = suggested.max(min);
        if let Some(max) = autoscaler.spec.max_replicas {
            clamped = clamped.min(max);
        }
        debug!(
            deployment = %key,
            queued = snapshot.queued,
            in_progress = snapshot.in_progress,
            suggested,
            clamped,
            "evaluated demand"
        );
        Ok(clamped)
    }
}

struct BusyRatioPolicy {
    scale_up_threshold: f64,
    scale_down_threshold: f64,
    scale_up_factor: f64,
    scale_down_factor: f64,
}

fn busy_ratio_replicas(
    current: u32,
    snapshot: &DemandSnapshot,
    policy: BusyRatioPolicy,
) -> Result<u32, EvaluatorError> {
    let in_unit = |v: f64| (0.0..=1.0).contains(&v);
    if !in_unit(policy.scale_up_threshold) || !in_unit(policy.scale_down_threshold) {
        return Err(EvaluatorError::InvalidMetric(
            "thresholds must be between 0 and 1".to_string(),
        ));
    }
    if policy.scale_down_threshold > policy.scale_up_threshold {
        return Err(EvaluatorError::InvalidMetric(
            "scale-down threshold exceeds scale-up threshold".to_string(),
        ));
    }
    if policy.scale_up_factor < 1.0 || !(0.0..=1.0).contains(&policy.scale_down_factor) {
        return Err(EvaluatorError::InvalidMetric(
            "scale-up factor must be >= 1 and scale-down factor within 0..=1".to_string(),
        ));
    }
    if snapshot.registered_runners == 0 {
        return Ok(current);
    }

    let ratio = f64::from(snapshot.busy_runners) / f64::from(snapshot.registered_runners);
    let replicas = if ratio >= policy.scale_up_threshold {
        (f64::from(current) * policy.scale_up_factor).ceil()
    } else if ratio < policy.scale_down_threshold {
        (f64::from(current) * policy.scale_down_factor).floor()
    } else {
        f64::from(current)
    };
    Ok(replicas.min(f64::from(u32::MAX)) as u32)
}
