//! StateStore — redb-backed persistence for canary rollouts.
//!
//! Provides typed reads over deployments, steps, analysis records, and
//! rollback records, plus an atomic [`WriteBatch`] commit for writes. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::batch::WriteBatch;
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

/// Persistence operations the rollout engine relies on.
///
/// All writes go through [`RolloutStore::commit`] so a transition is never
/// half-applied.
pub trait RolloutStore: Send + Sync {
    /// Get a deployment by id.
    fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>>;

    /// List all deployments.
    fn list_deployments(&self) -> StateResult<Vec<Deployment>>;

    /// List a deployment's steps ordered by step number.
    fn list_steps(&self, deployment_id: &str) -> StateResult<Vec<Step>>;

    /// Latest `limit` analysis records for a deployment, newest first.
    fn list_metrics(&self, deployment_id: &str, limit: usize) -> StateResult<Vec<MetricsRecord>>;

    /// Get a rollback record by id.
    fn get_rollback(&self, id: &str) -> StateResult<Option<RollbackRecord>>;

    /// List a deployment's rollback records, oldest first.
    fn list_rollbacks(&self, deployment_id: &str) -> StateResult<Vec<RollbackRecord>>;

    /// Apply every row of `batch` in a single transaction.
    fn commit(&self, batch: &WriteBatch) -> StateResult<()>;

    /// Delete a deployment together with its steps, metrics, and rollbacks.
    /// Returns true if the deployment existed.
    fn delete_deployment(&self, id: &str) -> StateResult<bool>;
}

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
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(STEPS).map_err(map_err!(Table))?;
        txn.open_table(METRICS).map_err(map_err!(Table))?;
        txn.open_table(ROLLBACKS).map_err(map_err!(Table))?;
        txn.open_table(ROLLBACK_INDEX).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read every value whose key starts with `prefix`, in key order.
    fn scan_prefix<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }
}

/// Collect the keys of `table` that start with `prefix`.
fn keys_with_prefix(
    table: &redb::Table<'_, &'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<Vec<String>> {
    let mut keys = Vec::new();
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key.to_string());
    }
    Ok(keys)
}

/// Hand out the next append key for `deployment_id` in `table`.
///
/// The counter lives in the same write transaction as the row it keys, so
/// keys grow strictly in commit order.
fn next_append_key(
    sequences: &mut redb::Table<'_, &'static str, u64>,
    table: &str,
    deployment_id: &str,
) -> StateResult<String> {
    let counter = format!("{table}:{deployment_id}");
    let last = sequences
        .get(counter.as_str())
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let seq = last + 1;
    sequences
        .insert(counter.as_str(), seq)
        .map_err(map_err!(Write))?;
    Ok(format!("{deployment_id}:{seq:016}"))
}

impl RolloutStore for StateStore {
    fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: Deployment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(deployment);
        }
        Ok(results)
    }

    fn list_steps(&self, deployment_id: &str) -> StateResult<Vec<Step>> {
        self.scan_prefix(STEPS, &format!("{deployment_id}:"))
    }

    fn list_metrics(&self, deployment_id: &str, limit: usize) -> StateResult<Vec<MetricsRecord>> {
        let mut records: Vec<MetricsRecord> =
            self.scan_prefix(METRICS, &format!("{deployment_id}:"))?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    fn get_rollback(&self, id: &str) -> StateResult<Option<RollbackRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(ROLLBACK_INDEX).map_err(map_err!(Table))?;
        let key = match index.get(id).map_err(map_err!(Read))? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        let table = txn.open_table(ROLLBACKS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: RollbackRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Err(StateError::NotFound(format!(
                "rollback index points at missing row {key}"
            ))),
        }
    }

    fn list_rollbacks(&self, deployment_id: &str) -> StateResult<Vec<RollbackRecord>> {
        self.scan_prefix(ROLLBACKS, &format!("{deployment_id}:"))
    }

    fn commit(&self, batch: &WriteBatch) -> StateResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        // Serialize everything before opening the transaction.
        let deployments = batch
            .deployments
            .iter()
            .map(|d| Ok((d.id.clone(), encode(d)?)))
            .collect::<StateResult<Vec<_>>>()?;
        let steps = batch
            .steps
            .iter()
            .map(|s| Ok((s.table_key(), encode(s)?)))
            .collect::<StateResult<Vec<_>>>()?;
        let metrics = batch
            .metrics
            .iter()
            .map(|m| Ok((m.deployment_id.as_str(), encode(m)?)))
            .collect::<StateResult<Vec<_>>>()?;
        let rollbacks = batch
            .rollbacks
            .iter()
            .map(|r| Ok((r.id.as_str(), r.deployment_id.as_str(), encode(r)?)))
            .collect::<StateResult<Vec<_>>>()?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            for (key, value) in &deployments {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        {
            let mut table = txn.open_table(STEPS).map_err(map_err!(Table))?;
            for (key, value) in &steps {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        let mut sequences = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        {
            let mut table = txn.open_table(METRICS).map_err(map_err!(Table))?;
            for (deployment_id, value) in &metrics {
                let key = next_append_key(&mut sequences, "metrics", deployment_id)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        {
            let mut table = txn.open_table(ROLLBACKS).map_err(map_err!(Table))?;
            let mut index = txn.open_table(ROLLBACK_INDEX).map_err(map_err!(Table))?;
            for (id, deployment_id, value) in &rollbacks {
                // Updates keep the row's original position.
                let existing = index
                    .get(*id)
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value().to_string());
                let key = match existing {
                    Some(key) => key,
                    None => next_append_key(&mut sequences, "rollbacks", deployment_id)?,
                };
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                index.insert(*id, key.as_str()).map_err(map_err!(Write))?;
            }
        }
        drop(sequences);
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(rows = batch.len(), "write batch committed");
        Ok(())
    }

    fn delete_deployment(&self, id: &str) -> StateResult<bool> {
        let prefix = format!("{id}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        for def in [STEPS, METRICS] {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            for key in keys_with_prefix(&table, &prefix)? {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        {
            let mut table = txn.open_table(ROLLBACKS).map_err(map_err!(Table))?;
            let mut index = txn.open_table(ROLLBACK_INDEX).map_err(map_err!(Table))?;
            for key in keys_with_prefix(&table, &prefix)? {
                let removed = table.remove(key.as_str()).map_err(map_err!(Write))?;
                if let Some(guard) = removed {
                    let record: RollbackRecord =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    index.remove(record.id.as_str()).map_err(map_err!(Write))?;
                }
            }
        }
        {
            let mut sequences = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            for table in ["metrics", "rollbacks"] {
                sequences
                    .remove(format!("{table}:{id}").as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %id, existed, "deployment deleted");
        Ok(existed)
    }
}

/// JSON-encode a row value.
fn encode<T: serde::Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}
