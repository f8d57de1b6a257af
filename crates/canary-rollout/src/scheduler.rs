//! Progression loop — the periodic trigger behind automatic rollouts.
//!
//! Each tick runs one cycle for every deployment whose increment interval
//! has elapsed since its last progress or last attempt. Cycles for
//! different deployments run in parallel; the per-deployment lock inside
//! the controller serializes them against API calls.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use canary_state::{Deployment, DeploymentStatus, RollbackTrigger};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::controller::{CycleAction, CycleReport};
use crate::engine::CanaryEngine;
use crate::epoch_millis;

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickSummary {
    pub reports: Vec<CycleReport>,
    pub rollbacks_executed: usize,
    pub errors: usize,
}

/// Drives due deployments forward on a fixed interval.
pub struct ProgressionLoop {
    engine: CanaryEngine,
    /// Millisecond timestamp of the last cycle attempted per deployment.
    last_attempt: Mutex<HashMap<String, u64>>,
    auto_execute_rollbacks: bool,
}

impl ProgressionLoop {
    pub fn new(engine: CanaryEngine) -> Self {
        Self {
            engine,
            last_attempt: Mutex::new(HashMap::new()),
            auto_execute_rollbacks: true,
        }
    }

    /// Whether automatic rollbacks are executed (stable traffic restored
    /// and the rollback completed) in the same tick.
    pub fn with_auto_execute_rollbacks(mut self, enabled: bool) -> Self {
        self.auto_execute_rollbacks = enabled;
        self
    }

    fn interval_ms(deployment: &Deployment) -> u64 {
        u64::from(deployment.increment_interval_minutes) * 60_000
    }

    fn is_due(&self, deployment: &Deployment, now: u64) -> bool {
        let last_attempt = self
            .last_attempt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&deployment.id)
            .copied()
            .unwrap_or(0);
        let last = deployment
            .last_progress_at
            .or(deployment.started_at)
            .unwrap_or(0)
            .max(last_attempt);
        now >= last.saturating_add(Self::interval_ms(deployment))
    }

    /// Run one tick now.
    pub async fn tick(&self) -> TickSummary {
        self.tick_at(epoch_millis()).await
    }

    pub(crate) async fn tick_at(&self, now: u64) -> TickSummary {
        let mut summary = TickSummary::default();
        let deployments = match self.engine.list() {
            Ok(deployments) => deployments,
            Err(e) => {
                error!(error = %e, "listing deployments failed");
                summary.errors += 1;
                return summary;
            }
        };

        {
            let mut attempts = self.last_attempt.lock().unwrap_or_else(|e| e.into_inner());
            attempts.retain(|id, _| {
                deployments
                    .iter()
                    .any(|d| &d.id == id && d.status.has_running_step())
            });
        }

        let mut cycles = JoinSet::new();
        let mut stranded = Vec::new();
        for deployment in &deployments {
            match deployment.status {
                status if status.has_running_step() => {
                    if !self.is_due(deployment, now) {
                        continue;
                    }
                    self.last_attempt
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(deployment.id.clone(), now);
                    let engine = self.engine.clone();
                    let id = deployment.id.clone();
                    cycles.spawn(async move {
                        let result = engine.progression().progress(&id).await;
                        (id, result)
                    });
                }
                DeploymentStatus::RollingBack => stranded.push(deployment.id.clone()),
                _ => {}
            }
        }

        let mut to_execute = Vec::new();
        while let Some(joined) = cycles.join_next().await {
            match joined {
                Ok((id, Ok(report))) => {
                    debug!(deployment = %id, action = ?report.action, "cycle finished");
                    if let CycleAction::RollbackInitiated { rollback_id } = &report.action {
                        to_execute.push(rollback_id.clone());
                    }
                    summary.reports.push(report);
                }
                Ok((id, Err(e))) => {
                    warn!(deployment = %id, error = %e, "cycle failed");
                    summary.errors += 1;
                }
                Err(e) => {
                    error!(error = %e, "cycle task panicked");
                    summary.errors += 1;
                }
            }
        }

        if !self.auto_execute_rollbacks {
            return summary;
        }

        // Automatic rollbacks left open by an earlier tick or a restart.
        for id in stranded {
            match self.engine.rollback_history(&id) {
                Ok(records) => to_execute.extend(
                    records
                        .into_iter()
                        .filter(|r| r.status.is_open() && r.trigger != RollbackTrigger::Manual)
                        .map(|r| r.id),
                ),
                Err(e) => {
                    warn!(deployment = %id, error = %e, "reading rollbacks failed");
                    summary.errors += 1;
                }
            }
        }

        for rollback_id in to_execute {
            match self.engine.rollbacks().execute(&rollback_id).await {
                Ok(record) => {
                    info!(
                        deployment = %record.deployment_id,
                        rollback = %record.id,
                        status = ?record.status,
                        "automatic rollback executed"
                    );
                    summary.rollbacks_executed += 1;
                }
                Err(e) => {
                    warn!(rollback = %rollback_id, error = %e, "executing rollback failed");
                    summary.errors += 1;
                }
            }
        }
        summary
    }

    /// Tick every `interval` until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "progression loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let summary = self.tick().await;
                    if !summary.reports.is_empty() || summary.errors > 0 {
                        debug!(
                            cycles = summary.reports.len(),
                            rollbacks = summary.rollbacks_executed,
                            errors = summary.errors,
                            "progression tick"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!("progression loop shutting down");
                    break;
                }
            }
        }
    }
}
