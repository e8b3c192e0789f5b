//! Autoscaler error types.

use thiserror::Error;

use runnerscale_state::StateError;

use crate::evaluator::EvaluatorError;

/// Errors surfaced by a reconcile pass.
#[derive(Debug, Error)]
pub enum AutoscaleError {
    /// Demand could not be evaluated; nothing was written.
    #[error("could not compute replicas for {autoscaler}: {source}")]
    Evaluator {
        autoscaler: String,
        #[source]
        source: EvaluatorError,
    },

    /// A write was rejected because the resource changed since it was read.
    /// The decision has to be recomputed from a fresh read.
    #[error("write conflict on {key}")]
    WriteConflict { key: String },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl AutoscaleError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, AutoscaleError::WriteConflict { .. })
    }
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;
