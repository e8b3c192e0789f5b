//! Controller loop: periodic reconciliation of every autoscaler.
//!
//! Autoscalers are reconciled one after another, so at most one pass per
//! autoscaler is ever in flight. A failed pass puts the autoscaler into
//! exponential back-off (`sync_interval` doubling up to `max_backoff`).
//! A write conflict is re-decided immediately from a fresh read, once; if
//! it conflicts again it is left for the next tick.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, info, warn};

use runnerscale_core::ControllerSettings;
use runnerscale_state::Timestamp;

use crate::epoch_secs;
use crate::error::AutoscaleResult;
use crate::reconciler::{ReconcileOutcome, Reconciler};

/// Per-autoscaler failure tracking.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    failures: u32,
    retry_at: Timestamp,
}

/// Counts from one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Passes that completed (including ones with nothing to write).
    pub applied: usize,
    /// Applied passes that changed a deployment's replicas.
    pub scaled: usize,
    pub skipped: usize,
    /// Autoscalers still conflicting after the immediate retry.
    pub conflicts: usize,
    pub failed: usize,
    /// Autoscalers not attempted because they are backing off.
    pub deferred: usize,
}

pub struct Controller {
    reconciler: Reconciler,
    sync_interval: Duration,
    max_backoff: Duration,
    backoff: HashMap<String, Backoff>,
}

impl Controller {
    pub fn new(reconciler: Reconciler, settings: &ControllerSettings) -> Self {
        Self {
            reconciler,
            sync_interval: settings.sync_interval,
            max_backoff: settings.max_backoff,
            backoff: HashMap::new(),
        }
    }

    /// Reconcile every stored autoscaler once at `now`.
    pub fn sync_once(&mut self, now: Timestamp) -> AutoscaleResult<SyncReport> {
        let autoscalers = self.reconciler.state().list_autoscalers()?;
        let keys: HashSet<String> = autoscalers.iter().map(|hra| hra.table_key()).collect();
        self.backoff.retain(|key, _| keys.contains(key));

        let mut report = SyncReport::default();
        for key in &keys {
            if let Some(backoff) = self.backoff.get(key)
                && backoff.retry_at > now
            {
                report.deferred += 1;
                continue;
            }

            let mut result = self.reconciler.reconcile(key, now);
            if matches!(&result, Err(e) if e.is_conflict()) {
                debug!(autoscaler = %key, "write conflict, re-deciding from a fresh read");
                result = self.reconciler.reconcile(key, now);
            }

            match result {
                Ok(ReconcileOutcome::Applied(decision)) => {
                    self.backoff.remove(key);
                    report.applied += 1;
                    if decision.target_patch.is_some() {
                        report.scaled += 1;
                    }
                }
                Ok(ReconcileOutcome::Skipped(reason)) => {
                    self.backoff.remove(key);
                    report.skipped += 1;
                    debug!(autoscaler = %key, ?reason, "reconcile skipped");
                }
                Err(e) if e.is_conflict() => {
                    report.conflicts += 1;
                    debug!(autoscaler = %key, error = %e, "still conflicting, retrying next pass");
                }
                Err(e) => {
                    report.failed += 1;
                    let backoff = self.record_failure(key, now);
                    warn!(
                        autoscaler = %key,
                        error = %e,
                        failures = backoff.failures,
                        retry_at = backoff.retry_at,
                        "reconcile failed"
                    );
                }
            }
        }
        Ok(report)
    }

    fn record_failure(&mut self, key: &str, now: Timestamp) -> Backoff {
        let failures = self.backoff.get(key).map_or(0, |b| b.failures) + 1;
        let delay = self.backoff_delay(failures);
        let backoff = Backoff {
            failures,
            retry_at: now.saturating_add(delay.as_secs()),
        };
        self.backoff.insert(key.to_string(), backoff);
        backoff
    }

    /// `sync_interval * 2^failures`, capped at `max_backoff`.
    fn backoff_delay(&self, failures: u32) -> Duration {
        let base = self.sync_interval.as_secs().max(1);
        let secs = base.saturating_mul(1u64 << failures.min(32));
        Duration::from_secs(secs.min(self.max_backoff.as_secs()))
    }

    /// Run the controller loop until `shutdown` flips.
    pub async fn run(&mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = self.sync_interval.as_secs(),
            "autoscaler controller started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.sync_interval) => {
                    match self.sync_once(epoch_secs()) {
                        Ok(report) => debug!(?report, "sync pass finished"),
                        Err(e) => tracing::error!(error = %e, "sync pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler controller shutting down");
                    break;
                }
            }
        }
    }
}
