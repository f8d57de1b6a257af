//! redb table definitions for the canary state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Deployments keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Steps keyed by `{deployment_id}:{step_number:04}`.
pub const STEPS: TableDefinition<&str, &[u8]> = TableDefinition::new("steps");

/// Analysis records keyed by `{deployment_id}:{seq:016}`.
pub const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");

/// Rollback records keyed by `{deployment_id}:{seq:016}`.
pub const ROLLBACKS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollbacks");

/// Secondary index: `{rollback_id}` → rollbacks table key.
pub const ROLLBACK_INDEX: TableDefinition<&str, &str> = TableDefinition::new("rollback_index");

/// Append counters keyed by `{table}:{deployment_id}`. Holds the last sequence
/// number handed out for that deployment's metrics or rollbacks.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
