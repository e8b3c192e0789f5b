//! Replica decision engine.
//!
//! Combines the status cache, the scale-down delay and the capacity
//! reservation overlay into one decision, and expresses the result as
//! patch intents. Nothing here writes; the reconciler hands the patches to a
//! [`PersistenceGateway`](crate::gateway::PersistenceGateway).
//!
//! ```text
//! cached = cache.lookup(DesiredReplicas, now)
//! baseline = cached
//!     or accept(previous, evaluator(target), last_scale_out, delay, now)
//! desired = min(baseline + active reservations, max_replicas)
//!
//! target patch  if desired != target.replicas (default 1)
//! status patch  if desired != status.desired_replicas,
//!               or the cache missed (prune + append baseline)
//! ```

use std::time::Duration;

use tracing::debug;

use runnerscale_core::ControllerSettings;
use runnerscale_core::config::DEFAULT_CACHE_DURATION;
use runnerscale_state::{
    AutoscalerStatus, CacheEntryKey, HorizontalRunnerAutoscaler, RunnerDeployment, Timestamp,
};

use crate::evaluator::{DemandEvaluator, EvaluatorError};
use crate::{cache, hysteresis, reservation};

/// Set the target deployment's replica count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetPatch {
    pub replicas: u32,
}

/// Replace the autoscaler's status with `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPatch {
    pub status: AutoscalerStatus,
}

/// Outcome of one `decide` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Post-delay, pre-reservation replica count.
    pub baseline: u32,
    /// Final count after reservations and the ceiling.
    pub desired: u32,
    /// Whether `baseline` came from the status cache.
    pub from_cache: bool,
    pub target_patch: Option<TargetPatch>,
    pub status_patch: Option<StatusPatch>,
}

impl Decision {
    pub fn is_noop(&self) -> bool {
        self.target_patch.is_none() && self.status_patch.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    cache_duration: Duration,
    default_scale_down_delay: Duration,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(&ControllerSettings::default())
    }
}

impl DecisionEngine {
    /// A `cache_duration` under one second would expire on the same unix
    /// second it was written, so it falls back to the default.
    pub fn new(settings: &ControllerSettings) -> Self {
        let cache_duration = if settings.cache_duration.as_secs() == 0 {
            DEFAULT_CACHE_DURATION
        } else {
            settings.cache_duration
        };
        Self {
            cache_duration,
            default_scale_down_delay: settings.scale_down_delay,
        }
    }

    /// Scale-down delay for an autoscaler: its own override, else the default.
    pub fn scale_down_delay(&self, hra: &HorizontalRunnerAutoscaler) -> Duration {
        hra.spec
            .scale_down_delay_seconds_after_scale_up
            .map(Duration::from_secs)
            .unwrap_or(self.default_scale_down_delay)
    }

    /// Decide the replica count for `target`. Fails only when the cache
    /// misses and `evaluator` fails, in which case no patch is produced.
    pub fn decide(
        &self,
        hra: &HorizontalRunnerAutoscaler,
        target: &RunnerDeployment,
        evaluator: &dyn DemandEvaluator,
        now: Timestamp,
    ) -> Result<Decision, EvaluatorError> {
        let current_replicas = target.replicas();
        let previous = hra.status.desired_replicas;

        let cached = cache::lookup(&hra.status, CacheEntryKey::DesiredReplicas, now);
        let baseline = match cached {
            Some(value) => value,
            None => {
                let candidate = evaluator.evaluate(target, hra)?;
                let accepted = hysteresis::accept(
                    previous,
                    candidate,
                    hra.status.last_successful_scale_out_time,
                    self.scale_down_delay(hra),
                    now,
                );
                if accepted != candidate {
                    debug!(
                        autoscaler = %hra.table_key(),
                        candidate,
                        retained = accepted,
                        "scale-down suppressed by delay window"
                    );
                }
                accepted
            }
        };

        let with_reservations = reservation::overlay(baseline, &hra.spec.capacity_reservations, now);
        let desired = match hra.spec.max_replicas {
            Some(max) => with_reservations.min(max),
            None => with_reservations,
        };

        let target_patch = (desired != current_replicas).then_some(TargetPatch { replicas: desired });

        // An absent published value always differs, so the first pass
        // writes `desired_replicas` even when it equals the default of one.
        let mut next_status: Option<AutoscalerStatus> = None;
        if previous != Some(desired) {
            let mut status = hra.status.clone();
            if hysteresis::is_scale_out(previous, desired) {
                status.last_successful_scale_out_time = Some(now);
            }
            status.desired_replicas = Some(desired);
            next_status = Some(status);
        }
        if cached.is_none() {
            let status = next_status.get_or_insert_with(|| hra.status.clone());
            status.cache_entries = cache::prepare_append(
                &status.cache_entries,
                CacheEntryKey::DesiredReplicas,
                baseline,
                now,
                self.cache_duration,
            );
        }

        debug!(
            autoscaler = %hra.table_key(),
            baseline,
            with_reservations,
            desired,
            current = current_replicas,
            from_cache = cached.is_some(),
            "replicas decided"
        );

        Ok(Decision {
            baseline,
            desired,
            from_cache: cached.is_some(),
            target_patch,
            status_patch: next_status.map(|status| StatusPatch { status }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use runnerscale_state::{
        AutoscalerSpec, CacheEntry, CapacityReservation, ObjectMeta, RunnerDeploymentSpec,
        ScaleTargetRef,
    };

    const NOW: Timestamp = 100_000;
    const MINUTE: u64 = 60;

    /// Evaluator returning a fixed value and counting its calls.
    struct Fixed {
        value: u32,
        calls: AtomicU32,
    }

    impl Fixed {
        fn new(value: u32) -> Self {
            Self {
                value,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DemandEvaluator for Fixed {
        fn evaluate(
            &self,
            _: &RunnerDeployment,
            _: &HorizontalRunnerAutoscaler,
        ) -> Result<u32, EvaluatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value)
        }
    }

    fn failing(_: &RunnerDeployment, _: &HorizontalRunnerAutoscaler) -> Result<u32, EvaluatorError> {
        Err(EvaluatorError::Unavailable("boom".to_string()))
    }

    fn autoscaler() -> HorizontalRunnerAutoscaler {
        HorizontalRunnerAutoscaler {
            metadata: ObjectMeta::new("default", "hra"),
            spec: AutoscalerSpec {
                scale_target_ref: ScaleTargetRef {
                    name: "runners".to_string(),
                },
                ..Default::default()
            },
            status: AutoscalerStatus::default(),
        }
    }

    fn deployment(replicas: Option<u32>) -> RunnerDeployment {
        RunnerDeployment {
            metadata: ObjectMeta::new("default", "runners"),
            spec: RunnerDeploymentSpec {
                replicas,
                ..Default::default()
            },
        }
    }

    fn cache_entry(value: u32, expiration_time: Timestamp) -> CacheEntry {
        CacheEntry {
            key: CacheEntryKey::DesiredReplicas,
            value,
            expiration_time,
        }
    }

    /// Fold a decision's status patch back into the autoscaler, as a
    /// successful write would.
    fn apply(hra: &mut HorizontalRunnerAutoscaler, decision: &Decision) {
        if let Some(patch) = &decision.status_patch {
            hra.status = patch.status.clone();
        }
    }

    #[test]
    fn first_decision_scales_out_and_caches() {
        let engine = DecisionEngine::default();
        let decision = engine
            .decide(&autoscaler(), &deployment(None), &Fixed::new(3), NOW)
            .unwrap();

        assert_eq!(decision.baseline, 3);
        assert_eq!(decision.desired, 3);
        assert!(!decision.from_cache);
        assert_eq!(decision.target_patch, Some(TargetPatch { replicas: 3 }));

        let status = decision.status_patch.unwrap().status;
        assert_eq!(status.desired_replicas, Some(3));
        assert_eq!(status.last_successful_scale_out_time, Some(NOW));
        assert_eq!(status.cache_entries, vec![cache_entry(3, NOW + 10 * MINUTE)]);
    }

    #[test]
    fn first_decision_of_one_does_not_record_scale_out() {
        let engine = DecisionEngine::default();
        let decision = engine
            .decide(&autoscaler(), &deployment(Some(1)), &Fixed::new(1), NOW)
            .unwrap();

        assert_eq!(decision.target_patch, None);
        let status = decision.status_patch.unwrap().status;
        assert_eq!(status.desired_replicas, Some(1));
        assert_eq!(status.last_successful_scale_out_time, None);
    }

    #[test]
    fn worked_example_delay_reservation_and_ceiling() {
        let engine = DecisionEngine::default();
        let mut hra = autoscaler();
        hra.status.desired_replicas = Some(2);
        hra.status.last_successful_scale_out_time = Some(NOW - 5 * MINUTE);
        hra.spec.capacity_reservations = vec![CapacityReservation {
            replicas: 3,
            expiration_time: NOW + MINUTE,
        }];
        hra.spec.max_replicas = Some(4);

        let decision = engine
            .decide(&hra, &deployment(Some(2)), &Fixed::new(1), NOW)
            .unwrap();

        assert_eq!(decision.baseline, 2);
        assert_eq!(decision.desired, 4);
        assert_eq!(decision.target_patch, Some(TargetPatch { replicas: 4 }));

        let status = decision.status_patch.unwrap().status;
        assert_eq!(status.desired_replicas, Some(4));
        assert_eq!(status.last_successful_scale_out_time, Some(NOW));
        // The cache holds the baseline, not the reserved or clamped value.
        assert_eq!(status.cache_entries, vec![cache_entry(2, NOW + 10 * MINUTE)]);
    }

    #[test]
    fn no_target_patch_when_already_at_desired() {
        let engine = DecisionEngine::default();
        let mut hra = autoscaler();
        hra.spec.max_replicas = Some(4);
        hra.spec.capacity_reservations = vec![CapacityReservation {
            replicas: 3,
            expiration_time: NOW + MINUTE,
        }];

        let decision = engine
            .decide(&hra, &deployment(Some(4)), &Fixed::new(2), NOW)
            .unwrap();
        assert_eq!(decision.desired, 4);
        assert_eq!(decision.target_patch, None);
    }

    #[test]
    fn cache_hit_skips_evaluator_and_status_refresh() {
        let engine = DecisionEngine::default();
        let evaluator = Fixed::new(5);
        let mut hra = autoscaler();

        let first = engine.decide(&hra, &deployment(None), &evaluator, NOW).unwrap();
        apply(&mut hra, &first);

        let second = engine
            .decide(&hra, &deployment(Some(5)), &evaluator, NOW + MINUTE)
            .unwrap();

        assert_eq!(evaluator.calls(), 1);
        assert!(second.from_cache);
        assert_eq!(second.baseline, first.baseline);
        assert!(second.is_noop());
    }

    #[test]
    fn cache_expiry_forces_reevaluation() {
        let engine = DecisionEngine::default();
        let evaluator = Fixed::new(5);
        let mut hra = autoscaler();

        let first = engine.decide(&hra, &deployment(None), &evaluator, NOW).unwrap();
        apply(&mut hra, &first);

        let later = NOW + 10 * MINUTE;
        let second = engine.decide(&hra, &deployment(Some(5)), &evaluator, later).unwrap();

        assert_eq!(evaluator.calls(), 2);
        assert!(!second.from_cache);
        // Desired is unchanged but the cache is refreshed.
        let status = second.status_patch.unwrap().status;
        assert_eq!(status.cache_entries, vec![cache_entry(5, later + 10 * MINUTE)]);
        assert_eq!(status.last_successful_scale_out_time, Some(NOW));
    }

    #[test]
    fn reservations_recomputed_on_cache_hit() {
        let engine = DecisionEngine::default();
        let mut hra = autoscaler();
        hra.status.desired_replicas = Some(5);
        hra.status.cache_entries = vec![cache_entry(2, NOW + MINUTE)];
        hra.spec.capacity_reservations = vec![CapacityReservation {
            replicas: 3,
            expiration_time: NOW,
        }];

        // The reservation expired at NOW; only the cached baseline remains.
        let decision = engine
            .decide(&hra, &deployment(Some(5)), &failing, NOW)
            .unwrap();

        assert!(decision.from_cache);
        assert_eq!(decision.desired, 2);
        assert_eq!(decision.target_patch, Some(TargetPatch { replicas: 2 }));
        let status = decision.status_patch.unwrap().status;
        assert_eq!(status.desired_replicas, Some(2));
        // A hit leaves the cache as it was.
        assert_eq!(status.cache_entries, hra.status.cache_entries);
    }

    #[test]
    fn active_reservation_counts_on_cache_hit() {
        let engine = DecisionEngine::default();
        let mut hra = autoscaler();
        hra.status.desired_replicas = Some(2);
        hra.status.cache_entries = vec![cache_entry(2, NOW + MINUTE)];
        hra.spec.capacity_reservations = vec![CapacityReservation {
            replicas: 3,
            expiration_time: NOW + 1,
        }];

        let decision = engine
            .decide(&hra, &deployment(Some(2)), &failing, NOW)
            .unwrap();
        assert_eq!(decision.desired, 5);
        assert_eq!(decision.target_patch, Some(TargetPatch { replicas: 5 }));
    }

    #[test]
    fn evaluator_failure_produces_no_decision() {
        let engine = DecisionEngine::default();
        let err = engine
            .decide(&autoscaler(), &deployment(Some(3)), &failing, NOW)
            .unwrap_err();
        assert!(matches!(err, EvaluatorError::Unavailable(_)));
    }

    #[test]
    fn scale_down_after_delay_elapsed() {
        let engine = DecisionEngine::default();
        let mut hra = autoscaler();
        hra.status.desired_replicas = Some(6);
        hra.status.last_successful_scale_out_time = Some(NOW - 10 * MINUTE);

        let decision = engine
            .decide(&hra, &deployment(Some(6)), &Fixed::new(2), NOW)
            .unwrap();

        assert_eq!(decision.desired, 2);
        assert_eq!(decision.target_patch, Some(TargetPatch { replicas: 2 }));
        let status = decision.status_patch.unwrap().status;
        assert_eq!(status.desired_replicas, Some(2));
        assert_eq!(status.last_successful_scale_out_time, Some(NOW - 10 * MINUTE));
    }

    #[test]
    fn per_autoscaler_delay_override() {
        let engine = DecisionEngine::default();
        let mut hra = autoscaler();
        hra.spec.scale_down_delay_seconds_after_scale_up = Some(60);
        hra.status.desired_replicas = Some(6);
        hra.status.last_successful_scale_out_time = Some(NOW - 2 * MINUTE);

        assert_eq!(engine.scale_down_delay(&hra), Duration::from_secs(60));
        let decision = engine
            .decide(&hra, &deployment(Some(6)), &Fixed::new(2), NOW)
            .unwrap();
        assert_eq!(decision.desired, 2);
    }

    #[test]
    fn ceiling_clamps_everything_above_it() {
        let engine = DecisionEngine::default();
        let mut hra = autoscaler();
        hra.spec.max_replicas = Some(3);

        for candidate in [4, 10, 1000] {
            let decision = engine
                .decide(&hra, &deployment(None), &Fixed::new(candidate), NOW)
                .unwrap();
            assert_eq!(decision.desired, 3);
        }
    }

    #[test]
    fn configured_cache_duration_is_used() {
        let settings = ControllerSettings {
            cache_duration: Duration::from_secs(90),
            ..Default::default()
        };
        let engine = DecisionEngine::new(&settings);
        let decision = engine
            .decide(&autoscaler(), &deployment(None), &Fixed::new(2), NOW)
            .unwrap();
        let status = decision.status_patch.unwrap().status;
        assert_eq!(status.cache_entries, vec![cache_entry(2, NOW + 90)]);
    }

    #[test]
    fn sub_second_cache_duration_still_caches() {
        let settings = ControllerSettings {
            cache_duration: Duration::from_millis(500),
            ..Default::default()
        };
        let engine = DecisionEngine::new(&settings);
        let evaluator = Fixed::new(3);
        let mut hra = autoscaler();

        let first = engine.decide(&hra, &deployment(None), &evaluator, NOW).unwrap();
        apply(&mut hra, &first);
        let second = engine
            .decide(&hra, &deployment(Some(3)), &evaluator, NOW)
            .unwrap();

        assert!(second.from_cache);
        assert_eq!(evaluator.calls(), 1);
        assert_eq!(hra.status.cache_entries, vec![cache_entry(3, NOW + 10 * MINUTE)]);
    }

    #[test]
    fn cache_hit_without_published_value_writes_status() {
        let engine = DecisionEngine::default();
        let mut hra = autoscaler();
        hra.status.cache_entries = vec![cache_entry(1, NOW + MINUTE)];

        let decision = engine
            .decide(&hra, &deployment(Some(1)), &failing, NOW)
            .unwrap();

        assert!(decision.from_cache);
        assert_eq!(decision.desired, 1);
        assert_eq!(decision.target_patch, None);
        let status = decision.status_patch.unwrap().status;
        assert_eq!(status.desired_replicas, Some(1));
        assert_eq!(status.last_successful_scale_out_time, None);
        assert_eq!(status.cache_entries, hra.status.cache_entries);
    }

    #[test]
    fn miss_prunes_expired_entries() {
        let engine = DecisionEngine::default();
        let mut hra = autoscaler();
        hra.status.desired_replicas = Some(2);
        hra.status.cache_entries = vec![cache_entry(9, NOW - 1), cache_entry(8, NOW)];

        let decision = engine
            .decide(&hra, &deployment(Some(2)), &Fixed::new(2), NOW)
            .unwrap();
        let status = decision.status_patch.unwrap().status;
        assert_eq!(status.cache_entries, vec![cache_entry(2, NOW + 10 * MINUTE)]);
        assert_eq!(status.desired_replicas, Some(2));
    }
}
