//! StateStore: redb-backed resource persistence for runnerscale.
//!
//! Provides typed CRUD operations over autoscalers, runner deployments,
//! demand snapshots and events. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(AUTOSCALERS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(DEMAND).map_err(map_err!(Table))?;
        txn.open_table(EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Autoscalers ────────────────────────────────────────────────

    /// Store a new autoscaler at version 1. Fails if the key is taken.
    pub fn create_autoscaler(
        &self,
        hra: &HorizontalRunnerAutoscaler,
    ) -> StateResult<HorizontalRunnerAutoscaler> {
        self.create_resource(AUTOSCALERS, hra)
    }

    /// Insert or replace an autoscaler regardless of its stored version.
    pub fn put_autoscaler(
        &self,
        hra: &HorizontalRunnerAutoscaler,
    ) -> StateResult<HorizontalRunnerAutoscaler> {
        self.put_resource(AUTOSCALERS, hra)
    }

    /// Get an autoscaler by namespace/name key.
    pub fn get_autoscaler(&self, key: &str) -> StateResult<Option<HorizontalRunnerAutoscaler>> {
        self.get_json(AUTOSCALERS, key)
    }

    /// List all autoscalers, ordered by key.
    pub fn list_autoscalers(&self) -> StateResult<Vec<HorizontalRunnerAutoscaler>> {
        self.list_json(AUTOSCALERS, "")
    }

    /// Delete an autoscaler by key. Returns true if it existed.
    pub fn delete_autoscaler(&self, key: &str) -> StateResult<bool> {
        self.delete_key(AUTOSCALERS, key)
    }

    /// Replace an autoscaler's status if its version is still `expected_version`.
    pub fn update_autoscaler_status(
        &self,
        key: &str,
        expected_version: u64,
        status: &AutoscalerStatus,
    ) -> StateResult<HorizontalRunnerAutoscaler> {
        self.update_resource(AUTOSCALERS, key, |hra: &mut HorizontalRunnerAutoscaler| {
            check_version(key, expected_version, hra.metadata.resource_version)?;
            hra.status = status.clone();
            Ok(())
        })
    }

    /// Append a capacity reservation to an autoscaler's spec, dropping any
    /// reservation that is no longer active at `now`.
    pub fn add_capacity_reservation(
        &self,
        key: &str,
        reservation: CapacityReservation,
        now: Timestamp,
    ) -> StateResult<HorizontalRunnerAutoscaler> {
        self.update_resource(AUTOSCALERS, key, |hra: &mut HorizontalRunnerAutoscaler| {
            hra.spec.capacity_reservations.retain(|r| r.is_active(now));
            hra.spec.capacity_reservations.push(reservation);
            Ok(())
        })
    }

    /// Flag an autoscaler as pending deletion.
    pub fn mark_autoscaler_deleting(
        &self,
        key: &str,
        now: Timestamp,
    ) -> StateResult<HorizontalRunnerAutoscaler> {
        self.update_resource(AUTOSCALERS, key, |hra: &mut HorizontalRunnerAutoscaler| {
            hra.metadata.deletion_timestamp.get_or_insert(now);
            Ok(())
        })
    }

    // ── Runner deployments ─────────────────────────────────────────

    /// Store a new deployment at version 1. Fails if the key is taken.
    pub fn create_deployment(&self, rd: &RunnerDeployment) -> StateResult<RunnerDeployment> {
        self.create_resource(DEPLOYMENTS, rd)
    }

    /// Insert or replace a deployment regardless of its stored version.
    pub fn put_deployment(&self, rd: &RunnerDeployment) -> StateResult<RunnerDeployment> {
        self.put_resource(DEPLOYMENTS, rd)
    }

    /// Get a deployment by namespace/name key.
    pub fn get_deployment(&self, key: &str) -> StateResult<Option<RunnerDeployment>> {
        self.get_json(DEPLOYMENTS, key)
    }

    /// List all deployments, ordered by key.
    pub fn list_deployments(&self) -> StateResult<Vec<RunnerDeployment>> {
        self.list_json(DEPLOYMENTS, "")
    }

    /// Delete a deployment by key. Returns true if it existed.
    pub fn delete_deployment(&self, key: &str) -> StateResult<bool> {
        self.delete_key(DEPLOYMENTS, key)
    }

    /// Set a deployment's replicas if its version is still `expected_version`.
    pub fn update_deployment_replicas(
        &self,
        key: &str,
        expected_version: u64,
        replicas: u32,
    ) -> StateResult<RunnerDeployment> {
        self.update_resource(DEPLOYMENTS, key, |rd: &mut RunnerDeployment| {
            check_version(key, expected_version, rd.metadata.resource_version)?;
            rd.spec.replicas = Some(replicas);
            Ok(())
        })
    }

    /// Flag a deployment as pending deletion.
    pub fn mark_deployment_deleting(
        &self,
        key: &str,
        now: Timestamp,
    ) -> StateResult<RunnerDeployment> {
        self.update_resource(DEPLOYMENTS, key, |rd: &mut RunnerDeployment| {
            rd.metadata.deletion_timestamp.get_or_insert(now);
            Ok(())
        })
    }

    // ── Demand ─────────────────────────────────────────────────────

    /// Record the latest demand snapshot for a deployment, replacing the previous one.
    pub fn put_demand(&self, snapshot: &DemandSnapshot) -> StateResult<()> {
        let value = serde_json::to_vec(snapshot).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEMAND).map_err(map_err!(Table))?;
            table
                .insert(snapshot.deployment_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Latest demand snapshot recorded for a deployment.
    pub fn get_demand(&self, deployment_key: &str) -> StateResult<Option<DemandSnapshot>> {
        self.get_json(DEMAND, deployment_key)
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Append an event.
    pub fn record_event(&self, event: &Event) -> StateResult<()> {
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            let mut seq = 0;
            let mut key = event.table_key(seq);
            while table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                seq += 1;
                key = event.table_key(seq);
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Events recorded against a resource, oldest first.
    pub fn list_events_for(&self, object_key: &str) -> StateResult<Vec<Event>> {
        self.list_json(EVENTS, &format!("{object_key}:"))
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, def: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn delete_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "resource deleted");
        Ok(existed)
    }

    fn create_resource<T>(&self, def: JsonTable, resource: &T) -> StateResult<T>
    where
        T: Resource + Serialize + Clone,
    {
        let key = resource.metadata().key();
        let mut stored = resource.clone();
        stored.metadata_mut().resource_version = 1;
        let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "resource created");
        Ok(stored)
    }

    fn put_resource<T>(&self, def: JsonTable, resource: &T) -> StateResult<T>
    where
        T: Resource + Serialize + DeserializeOwned + Clone,
    {
        let key = resource.metadata().key();
        let mut stored = resource.clone();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current_version = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let current: T =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    current.metadata().resource_version
                }
                None => 0,
            };
            stored.metadata_mut().resource_version = current_version + 1;
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, version = stored.metadata().resource_version, "resource stored");
        Ok(stored)
    }

    /// Read-modify-write a resource inside one write transaction, bumping its
    /// version. An error from `mutate` aborts the transaction.
    fn update_resource<T, F>(&self, def: JsonTable, key: &str, mutate: F) -> StateResult<T>
    where
        T: Resource + Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> StateResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let mut current: T = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(key.to_string())),
            };
            mutate(&mut current)?;
            current.metadata_mut().resource_version += 1;
            let value = serde_json::to_vec(&current).map_err(map_err!(Serialize))?;
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
            current
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, version = updated.metadata().resource_version, "resource updated");
        Ok(updated)
    }
}

fn check_version(key: &str, expected: u64, actual: u64) -> StateResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StateError::Conflict {
            key: key.to_string(),
            expected,
            actual,
        })
    }
}
