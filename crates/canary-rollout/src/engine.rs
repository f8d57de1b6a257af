//! Engine wiring — the explicit context every operation runs against.
//!
//! There is no process-wide state: the store, the lock registry, and the
//! collaborators are owned by a [`RolloutContext`] that is passed into the
//! controllers.

use std::sync::Arc;
use std::time::Duration;

use canary_state::{Deployment, MetricsRecord, RollbackRecord, RolloutStore, Step};
use serde::Serialize;
use tracing::info;

use crate::advisory::AdvisoryTextGenerator;
use crate::controller::ProgressionController;
use crate::error::{RolloutError, RolloutResult};
use crate::locks::DeploymentLocks;
use crate::providers::{MetricsProvider, SyntheticMetricsProvider};
use crate::recorder::MetricsRecorder;
use crate::rollback::RollbackController;
use crate::traffic::{NoopTrafficController, TrafficController};

/// Default deadline for advisory text.
pub const DEFAULT_ADVISORY_TIMEOUT: Duration = Duration::from_secs(3);

/// Store, locks, and collaborators shared by the controllers.
pub struct RolloutContext {
    pub store: Arc<dyn RolloutStore>,
    pub locks: DeploymentLocks,
    pub metrics: Arc<dyn MetricsProvider>,
    pub traffic: Arc<dyn TrafficController>,
    pub advisory: Option<Arc<dyn AdvisoryTextGenerator>>,
    pub advisory_timeout: Duration,
}

impl RolloutContext {
    /// Context with synthetic metrics, log-only traffic, and no advisory.
    pub fn new(store: Arc<dyn RolloutStore>) -> Self {
        Self {
            store,
            locks: DeploymentLocks::new(),
            metrics: Arc::new(SyntheticMetricsProvider::new()),
            traffic: Arc::new(NoopTrafficController),
            advisory: None,
            advisory_timeout: DEFAULT_ADVISORY_TIMEOUT,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsProvider>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_traffic(mut self, traffic: Arc<dyn TrafficController>) -> Self {
        self.traffic = traffic;
        self
    }

    pub fn with_advisory(mut self, advisory: Arc<dyn AdvisoryTextGenerator>) -> Self {
        self.advisory = Some(advisory);
        self
    }

    pub fn with_advisory_timeout(mut self, timeout: Duration) -> Self {
        self.advisory_timeout = timeout;
        self
    }

    pub(crate) fn load_deployment(&self, id: &str) -> RolloutResult<Deployment> {
        self.store
            .get_deployment(id)?
            .ok_or_else(|| RolloutError::NotFound(format!("deployment {id}")))
    }

    pub(crate) async fn apply_canary_percent(
        &self,
        deployment: &Deployment,
        percent: u32,
    ) -> RolloutResult<()> {
        self.traffic
            .apply_canary_percent(deployment, percent)
            .await
            .map_err(RolloutError::Traffic)
    }

    pub(crate) async fn restore_stable(&self, deployment: &Deployment) -> RolloutResult<()> {
        self.traffic
            .restore_stable(deployment)
            .await
            .map_err(RolloutError::Traffic)
    }
}

/// A deployment together with its step ladder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentView {
    pub deployment: Deployment,
    pub steps: Vec<Step>,
}

/// Entry point bundling the controllers over one context.
#[derive(Clone)]
pub struct CanaryEngine {
    ctx: Arc<RolloutContext>,
    progression: ProgressionController,
    rollbacks: RollbackController,
    recorder: MetricsRecorder,
}

impl CanaryEngine {
    pub fn new(ctx: RolloutContext) -> Self {
        let ctx = Arc::new(ctx);
        Self {
            progression: ProgressionController::new(ctx.clone()),
            rollbacks: RollbackController::new(ctx.clone()),
            recorder: MetricsRecorder::new(ctx.store.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &RolloutContext {
        &self.ctx
    }

    pub fn progression(&self) -> &ProgressionController {
        &self.progression
    }

    pub fn rollbacks(&self) -> &RollbackController {
        &self.rollbacks
    }

    pub fn recorder(&self) -> &MetricsRecorder {
        &self.recorder
    }

    /// Get a deployment and its steps.
    pub fn get(&self, id: &str) -> RolloutResult<DeploymentView> {
        let deployment = self.ctx.load_deployment(id)?;
        let steps = self.ctx.store.list_steps(id)?;
        Ok(DeploymentView { deployment, steps })
    }

    /// List all deployments, oldest first.
    pub fn list(&self) -> RolloutResult<Vec<Deployment>> {
        let mut deployments = self.ctx.store.list_deployments()?;
        deployments.sort_by_key(|d| d.created_at);
        Ok(deployments)
    }

    /// Latest analysis records for a deployment, newest first.
    pub fn metrics(&self, id: &str, limit: usize) -> RolloutResult<Vec<MetricsRecord>> {
        self.ctx.load_deployment(id)?;
        self.recorder.latest(id, limit)
    }

    /// Delete a deployment that is not mid-rollout, with all its records.
    pub async fn delete(&self, id: &str) -> RolloutResult<()> {
        {
            let _guard = self.ctx.locks.acquire(id).await;
            let deployment = self.ctx.load_deployment(id)?;
            if !deployment.status.is_terminal()
                && deployment.status != canary_state::DeploymentStatus::Pending
            {
                return Err(RolloutError::Conflict(format!(
                    "deployment {id} is {}; cancel it before deleting",
                    deployment.status
                )));
            }
            self.ctx.store.delete_deployment(id)?;
        }
        self.ctx.locks.forget(id).await;
        info!(deployment = %id, "deployment deleted");
        Ok(())
    }

    /// Rollback records for a deployment, oldest first.
    pub fn rollback_history(&self, id: &str) -> RolloutResult<Vec<RollbackRecord>> {
        self.ctx.load_deployment(id)?;
        self.rollbacks.list(id)
    }
}
