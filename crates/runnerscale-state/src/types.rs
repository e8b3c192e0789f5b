//! Resource types for the runnerscale state store.
//!
//! These types represent the persisted autoscalers, runner deployments,
//! demand snapshots and events. All types are serializable to/from JSON for
//! storage in redb tables. Timestamps are unix seconds.

use serde::{Deserialize, Serialize};

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Replicas assumed for a deployment that does not set its count.
pub const DEFAULT_REPLICAS: u32 = 1;

// ── Metadata ──────────────────────────────────────────────────────

/// Identity and concurrency bookkeeping shared by every stored resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Incremented by the store on every successful write.
    #[serde(default)]
    pub resource_version: u64,
    /// Set when the resource is pending deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<Timestamp>,
}

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            resource_version: 0,
            deletion_timestamp: None,
        }
    }

    /// `{namespace}/{name}`.
    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Build the `{namespace}/{name}` key used by every resource table.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

// ── Autoscaler ────────────────────────────────────────────────────

/// Autoscaler driving the replica count of one runner deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalRunnerAutoscaler {
    pub metadata: ObjectMeta,
    pub spec: AutoscalerSpec,
    #[serde(default)]
    pub status: AutoscalerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerSpec {
    /// Deployment in the autoscaler's namespace whose replicas are driven.
    pub scale_target_ref: ScaleTargetRef,
    /// Floor applied by the demand evaluator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<u32>,
    /// Hard ceiling applied after reservations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<u32>,
    /// Overrides the controller-wide scale-down delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_delay_seconds_after_scale_up: Option<u64>,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub capacity_reservations: Vec<CapacityReservation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScaleTargetRef {
    pub name: String,
}

/// Demand signal an autoscaler scales on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MetricSpec {
    /// Desired replicas equal queued plus in-progress workflow runs.
    TotalNumberOfQueuedAndInProgressWorkflowRuns,
    /// Grow or shrink the current count by a factor when the busy ratio
    /// crosses a threshold.
    #[serde(rename_all = "camelCase")]
    PercentageRunnersBusy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale_up_threshold: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale_down_threshold: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale_up_factor: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale_down_factor: Option<f64>,
    },
}

/// Temporary additive replica boost, active while `expiration_time > now`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReservation {
    pub replicas: u32,
    pub expiration_time: Timestamp,
}

impl CapacityReservation {
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.expiration_time > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_scale_out_time: Option<Timestamp>,
    #[serde(default)]
    pub cache_entries: Vec<CacheEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CacheEntryKey {
    #[serde(rename = "desiredReplicas")]
    DesiredReplicas,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: CacheEntryKey,
    pub value: u32,
    pub expiration_time: Timestamp,
}

impl HorizontalRunnerAutoscaler {
    /// Build the composite key for the autoscalers table.
    pub fn table_key(&self) -> String {
        self.metadata.key()
    }

    /// Key of the deployment this autoscaler targets.
    pub fn target_key(&self) -> String {
        object_key(&self.metadata.namespace, &self.spec.scale_target_ref.name)
    }
}

// ── Runner deployment ─────────────────────────────────────────────

/// The scalable workload. Only `spec.replicas` is written by the autoscaler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunnerDeployment {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RunnerDeploymentSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunnerDeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    /// Repository or organization the runners register with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl RunnerDeployment {
    /// Build the composite key for the deployments table.
    pub fn table_key(&self) -> String {
        self.metadata.key()
    }

    /// Current replica count, defaulting to one.
    pub fn replicas(&self) -> u32 {
        self.spec.replicas.unwrap_or(DEFAULT_REPLICAS)
    }
}

// ── Demand ────────────────────────────────────────────────────────

/// Point-in-time workflow demand observed for a runner deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DemandSnapshot {
    /// `{namespace}/{name}` of the runner deployment.
    pub deployment_key: String,
    pub queued: u32,
    pub in_progress: u32,
    #[serde(default)]
    pub busy_runners: u32,
    #[serde(default)]
    pub registered_runners: u32,
    pub observed_at: Timestamp,
}

// ── Events ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// Event recorded against a resource, for operators to inspect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// `{namespace}/{name}` of the resource the event is about.
    pub object_key: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: Timestamp,
}

impl Event {
    /// Build the composite key for the events table. `seq` breaks ties
    /// between events recorded in the same second.
    pub fn table_key(&self, seq: u64) -> String {
        format!("{}:{:020}:{:06}", self.object_key, self.timestamp, seq)
    }
}

// ── Resource trait ────────────────────────────────────────────────

/// A stored resource with versioned metadata.
pub trait Resource {
    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}

impl Resource for HorizontalRunnerAutoscaler {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for RunnerDeployment {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
