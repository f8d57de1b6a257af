//! canary-rollout — progressive canary delivery.
//!
//! Shifts traffic from a stable version to a canary in discrete steps,
//! analyses canary health every cycle, and either advances, promotes, or
//! rolls the canary back.
//!
//! # Components
//!
//! - **`planner`**: expands initial/target/increment into the step ladder
//! - **`analyzer`**: classifies a metrics snapshot against thresholds
//! - **`controller`**: progression state machine (start, progress, promote, pause, cancel)
//! - **`rollback`**: rollback records and their completion
//! - **`recorder`**: append-only analysis records
//! - **`providers`**, **`traffic`**, **`advisory`**: collaborator seams
//! - **`locks`**: per-deployment mutual exclusion
//! - **`scheduler`**: periodic progression loop
//!
//! # Cycle
//!
//! ```text
//! lock(deployment)
//!   ├── MetricsProvider::fetch()     → snapshot (invalid/failed = no data)
//!   ├── analyzer::analyze()          → Analysis
//!   ├── decide: rollback | advance | promote | await approval | hold
//!   ├── TrafficController            (advance/promote only, before persisting)
//!   └── RolloutStore::commit(batch)  → one transaction, incl. metrics record
//! unlock
//! AdvisoryTextGenerator::explain()   (degraded/unhealthy only, best-effort)
//! ```

pub mod advisory;
pub mod analyzer;
pub mod controller;
pub mod engine;
pub mod error;
pub mod locks;
pub mod planner;
pub mod providers;
pub mod recorder;
pub mod rollback;
pub mod scheduler;
pub mod traffic;

#[cfg(test)]
pub(crate) mod testutil;

use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

pub use advisory::{AdvisoryTextGenerator, HttpAdvisory, TemplateAdvisory};
pub use analyzer::{Analysis, analyze};
pub use controller::{CycleAction, CycleReport, DeploymentRequest, ProgressionController};
pub use engine::{CanaryEngine, DeploymentView, RolloutContext};
pub use error::{RolloutError, RolloutResult};
pub use locks::DeploymentLocks;
pub use planner::plan_steps;
pub use providers::{MetricsProvider, StaticMetricsProvider, SyntheticMetricsProvider};
pub use recorder::MetricsRecorder;
pub use rollback::RollbackController;
pub use scheduler::{ProgressionLoop, TickSummary};
pub use traffic::{NoopTrafficController, TrafficController};

/// Boxed `Send` future returned by collaborator trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Current Unix time in milliseconds.
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
