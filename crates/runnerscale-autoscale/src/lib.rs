//! runnerscale-autoscale: replica decisions for runner deployments.
//!
//! Turns a `HorizontalRunnerAutoscaler` and its target `RunnerDeployment`
//! into a desired replica count and the patches needed to get there.
//!
//! ```text
//!              +-------------+
//!  evaluator ->|  hysteresis |--+
//!              +-------------+  |   +-------+   +-------------+
//!                               +-->| cache |-->| reservation |--> desired
//!  status cache ----------------+   +-------+   +-------------+
//!                                                      |
//!                              reconciler <- patches <-+
//!                                   |
//!                          persistence gateway
//! ```
//!
//! The [`Controller`] drives the [`Reconciler`] for every stored autoscaler
//! on a fixed interval, with per-autoscaler back-off on failure.

pub mod cache;
pub mod controller;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod gateway;
pub mod hysteresis;
pub mod reconciler;
pub mod reservation;

pub use controller::{Controller, SyncReport};
pub use engine::{Decision, DecisionEngine, StatusPatch, TargetPatch};
pub use error::{AutoscaleError, AutoscaleResult};
pub use evaluator::{DemandEvaluator, EvaluatorError, SnapshotEvaluator};
pub use gateway::PersistenceGateway;
pub use reconciler::{ReconcileOutcome, Reconciler, SkipReason};

use std::time::{SystemTime, UNIX_EPOCH};

use runnerscale_state::Timestamp;

/// Current wall-clock time as unix seconds.
pub fn epoch_secs() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
