//! Scale-down delay.
//!
//! A freshly computed replica count may always raise the published value,
//! but may only lower it once `scale_down_delay` has elapsed since the last
//! successful scale-out. Both rules are pure functions of their inputs.

use std::time::Duration;

use runnerscale_state::Timestamp;

/// Decide which value becomes the baseline: the fresh `candidate` or the
/// previously published count.
pub fn accept(
    previous_desired: Option<u32>,
    candidate: u32,
    last_scale_out: Option<Timestamp>,
    scale_down_delay: Duration,
    now: Timestamp,
) -> u32 {
    let Some(previous) = previous_desired else {
        return candidate;
    };
    if candidate > previous {
        return candidate;
    }
    match last_scale_out {
        None => candidate,
        Some(at) if at.saturating_add(scale_down_delay.as_secs()) <= now => candidate,
        Some(_) => previous,
    }
}

/// Whether publishing `next` counts as a scale-out relative to the
/// previously published value. With nothing published, anything above one
/// replica is growth.
pub fn is_scale_out(previous_desired: Option<u32>, next: u32) -> bool {
    match previous_desired {
        None => next > 1,
        Some(previous) => next > previous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_secs(600);
    const NOW: Timestamp = 10_000;

    #[test]
    fn first_decision_takes_candidate() {
        assert_eq!(accept(None, 3, None, DELAY, NOW), 3);
        assert_eq!(accept(None, 0, Some(NOW), DELAY, NOW), 0);
    }

    #[test]
    fn scale_up_is_immediate_inside_window() {
        for candidate in 3..10 {
            assert_eq!(accept(Some(2), candidate, Some(NOW - 1), DELAY, NOW), candidate);
        }
    }

    #[test]
    fn scale_down_suppressed_inside_window() {
        assert_eq!(accept(Some(2), 1, Some(NOW - 300), DELAY, NOW), 2);
        assert_eq!(accept(Some(5), 0, Some(NOW), DELAY, NOW), 5);
    }

    #[test]
    fn scale_down_allowed_once_window_elapsed() {
        // Exactly at the boundary counts as elapsed.
        assert_eq!(accept(Some(2), 1, Some(NOW - 600), DELAY, NOW), 1);
        assert_eq!(accept(Some(2), 1, Some(NOW - 601), DELAY, NOW), 1);
        assert_eq!(accept(Some(2), 1, Some(NOW - 599), DELAY, NOW), 2);
    }

    #[test]
    fn scale_down_allowed_without_scale_out_history() {
        assert_eq!(accept(Some(4), 1, None, DELAY, NOW), 1);
    }

    #[test]
    fn equal_candidate_is_kept() {
        assert_eq!(accept(Some(4), 4, Some(NOW), DELAY, NOW), 4);
    }

    #[test]
    fn zero_delay_never_suppresses() {
        assert_eq!(accept(Some(4), 1, Some(NOW), Duration::ZERO, NOW), 1);
    }

    #[test]
    fn scale_out_detection() {
        assert!(is_scale_out(None, 2));
        assert!(!is_scale_out(None, 1));
        assert!(!is_scale_out(None, 0));
        assert!(is_scale_out(Some(2), 3));
        assert!(!is_scale_out(Some(2), 2));
        assert!(!is_scale_out(Some(2), 1));
    }
}
