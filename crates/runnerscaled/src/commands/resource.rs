use anyhow::Context;
use serde::Serialize;
use tracing::info;

use runnerscale_core::parse_duration;
use runnerscale_state::{
    CapacityReservation, DemandSnapshot, Event, HorizontalRunnerAutoscaler, StateStore, Timestamp,
};

use super::object_ref;

pub fn reserve(
    state: &StateStore,
    autoscaler: &str,
    replicas: u32,
    duration: &str,
    now: Timestamp,
) -> anyhow::Result<()> {
    let key = object_ref(autoscaler)?;
    let duration =
        parse_duration(duration).with_context(|| format!("invalid duration {duration:?}"))?;
    if duration.is_zero() {
        anyhow::bail!("reservation duration must be greater than zero");
    }

    let reservation = CapacityReservation {
        replicas,
        expiration_time: now.saturating_add(duration.as_secs()),
    };
    state
        .add_capacity_reservation(key, reservation, now)
        .with_context(|| format!("reserving capacity on {key}"))?;
    info!(
        autoscaler = %key,
        replicas,
        expires_at = reservation.expiration_time,
        "capacity reserved"
    );
    println!(
        "reserved {replicas} replica(s) on {key} until {}",
        reservation.expiration_time
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DemandCounts {
    pub queued: u32,
    pub in_progress: u32,
    pub busy: u32,
    pub registered: u32,
}

pub fn demand(
    state: &StateStore,
    deployment: &str,
    counts: DemandCounts,
    now: Timestamp,
) -> anyhow::Result<()> {
    let key = object_ref(deployment)?;
    if counts.busy > counts.registered {
        anyhow::bail!(
            "busy runners ({}) exceed registered runners ({})",
            counts.busy,
            counts.registered
        );
    }
    if state.get_deployment(key)?.is_none() {
        anyhow::bail!("runner deployment {key} not found");
    }

    state.put_demand(&DemandSnapshot {
        deployment_key: key.to_string(),
        queued: counts.queued,
        in_progress: counts.in_progress,
        busy_runners: counts.busy,
        registered_runners: counts.registered,
        observed_at: now,
    })?;
    info!(deployment = %key, ?counts, "demand recorded");
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    autoscaler: HorizontalRunnerAutoscaler,
    events: Vec<Event>,
}

const STATUS_EVENTS: usize = 10;

pub fn status(state: &StateStore, autoscaler: &str) -> anyhow::Result<()> {
    println!("{}", status_json(state, autoscaler)?);
    Ok(())
}

fn status_json(state: &StateStore, autoscaler: &str) -> anyhow::Result<String> {
    let key = object_ref(autoscaler)?;
    let hra = state
        .get_autoscaler(key)?
        .with_context(|| format!("autoscaler {key} not found"))?;
    let mut events = state.list_events_for(key)?;
    let skip = events.len().saturating_sub(STATUS_EVENTS);
    events.drain(..skip);
    Ok(serde_json::to_string_pretty(&StatusReport {
        autoscaler: hra,
        events,
    })?)
}
