//! Capacity reservations overlaid on the baseline.

use runnerscale_state::{CapacityReservation, Timestamp};

/// Replicas contributed by reservations still active at `now`.
pub fn active_reserved(reservations: &[CapacityReservation], now: Timestamp) -> u32 {
    reservations
        .iter()
        .filter(|r| r.is_active(now))
        .fold(0u32, |sum, r| sum.saturating_add(r.replicas))
}

/// Add the active reservations on top of `baseline`.
pub fn overlay(baseline: u32, reservations: &[CapacityReservation], now: Timestamp) -> u32 {
    baseline.saturating_add(active_reserved(reservations, now))
}
