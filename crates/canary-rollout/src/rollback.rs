//! Rollback controller — compensating actions for a canary.
//!
//! `initiate` records the rollback and moves the deployment to
//! `rolling_back`; `complete` closes it as `rolled_back` or `failed`.
//! Restoring stable traffic happens between the two, either through
//! [`RollbackController::execute`] or by the caller.

use std::sync::Arc;

use canary_state::{
    Deployment, DeploymentStatus, RollbackRecord, RollbackStatus, RollbackTrigger, Step,
    StepStatus, WriteBatch,
};
use tracing::{info, warn};

use crate::engine::RolloutContext;
use crate::epoch_millis;
use crate::error::{RolloutError, RolloutResult};

/// Index of the step in flight: the running step, a parked step of a
/// paused deployment, or the last completed step awaiting approval.
fn in_flight_index(steps: &[Step]) -> Option<usize> {
    steps
        .iter()
        .position(|s| s.status == StepStatus::Running)
        .or_else(|| {
            steps
                .iter()
                .position(|s| s.status == StepStatus::Pending && s.started_at.is_some())
        })
        .or_else(|| steps.iter().rposition(|s| s.status == StepStatus::Completed))
}

/// Apply a rollback to `deployment` and `steps` in memory.
///
/// Returns the new record and the steps it changed. The caller commits
/// them together with the deployment in one batch, under the deployment
/// lock.
pub(crate) fn prepare_initiate(
    ctx: &RolloutContext,
    deployment: &mut Deployment,
    steps: &mut [Step],
    reason: &str,
    trigger: RollbackTrigger,
    initiated_by: Option<&str>,
    now: u64,
) -> RolloutResult<(RollbackRecord, Vec<Step>)> {
    if !matches!(
        deployment.status,
        DeploymentStatus::Initializing
            | DeploymentStatus::Progressing
            | DeploymentStatus::Paused
            | DeploymentStatus::Promoting
    ) {
        return Err(RolloutError::Conflict(format!(
            "deployment {} is {}; nothing to roll back",
            deployment.id, deployment.status
        )));
    }
    if let Some(open) = ctx
        .store
        .list_rollbacks(&deployment.id)?
        .into_iter()
        .find(|r| r.status.is_open())
    {
        return Err(RolloutError::Conflict(format!(
            "rollback {} is already {:?} for deployment {}",
            open.id, open.status, deployment.id
        )));
    }

    let in_flight = in_flight_index(steps);
    let record = RollbackRecord {
        id: uuid::Uuid::new_v4().to_string(),
        deployment_id: deployment.id.clone(),
        trigger,
        canary_percent_at_trigger: deployment.current_canary_percent,
        step_number_at_trigger: in_flight.map(|i| steps[i].step_number),
        target_version: deployment.stable_version.clone(),
        target_image: deployment.stable_image.clone(),
        status: RollbackStatus::InProgress,
        initiated_by: initiated_by.map(str::to_string),
        reason: reason.to_string(),
        error_message: None,
        initiated_at: now,
        completed_at: None,
    };

    let mut changed = Vec::new();
    for (i, step) in steps.iter_mut().enumerate() {
        let parked = step.status == StepStatus::Pending && step.started_at.is_some();
        if Some(i) == in_flight && (step.status == StepStatus::Running || parked) {
            step.status = StepStatus::Failed;
            step.completed_at = Some(now);
            changed.push(step.clone());
        } else if step.status == StepStatus::Pending {
            step.status = StepStatus::Skipped;
            changed.push(step.clone());
        }
    }

    deployment.status = DeploymentStatus::RollingBack;
    deployment.status_message = Some(reason.to_string());
    deployment.updated_at = now;

    Ok((record, changed))
}

/// Records rollbacks and closes them out.
#[derive(Clone)]
pub struct RollbackController {
    ctx: Arc<RolloutContext>,
}

impl RollbackController {
    pub fn new(ctx: Arc<RolloutContext>) -> Self {
        Self { ctx }
    }

    /// Start a rollback for `deployment_id`.
    ///
    /// A second call while a rollback is open is a conflict.
    pub async fn initiate(
        &self,
        deployment_id: &str,
        reason: &str,
        trigger: RollbackTrigger,
        initiated_by: Option<&str>,
    ) -> RolloutResult<RollbackRecord> {
        let _guard = self.ctx.locks.acquire(deployment_id).await;
        let mut deployment = self.ctx.load_deployment(deployment_id)?;
        let mut steps = self.ctx.store.list_steps(deployment_id)?;

        let (record, changed) = prepare_initiate(
            &self.ctx,
            &mut deployment,
            &mut steps,
            reason,
            trigger,
            initiated_by,
            epoch_millis(),
        )?;
        self.ctx.store.commit(
            &WriteBatch::new()
                .deployment(deployment)
                .steps(changed)
                .rollback(record.clone()),
        )?;
        warn!(
            deployment = %deployment_id,
            rollback = %record.id,
            trigger = ?trigger,
            percent = record.canary_percent_at_trigger,
            %reason,
            "rollback initiated"
        );
        Ok(record)
    }

    /// Close an open rollback. On success the deployment becomes
    /// `rolled_back` at 0%; otherwise it becomes `failed`.
    pub async fn complete(
        &self,
        rollback_id: &str,
        success: bool,
        error_message: Option<&str>,
    ) -> RolloutResult<RollbackRecord> {
        let deployment_id = self.get(rollback_id)?.deployment_id;
        let _guard = self.ctx.locks.acquire(&deployment_id).await;
        let (record, deployment) = self.load_open(rollback_id)?;
        self.finish(record, deployment, success, error_message)
    }

    /// Restore stable traffic for an open rollback, then complete it.
    ///
    /// A traffic failure completes the rollback as failed.
    pub async fn execute(&self, rollback_id: &str) -> RolloutResult<RollbackRecord> {
        let deployment_id = self.get(rollback_id)?.deployment_id;
        let _guard = self.ctx.locks.acquire(&deployment_id).await;
        let (record, deployment) = self.load_open(rollback_id)?;

        match self.ctx.restore_stable(&deployment).await {
            Ok(()) => self.finish(record, deployment, true, None),
            Err(e) => {
                let message = e.to_string();
                self.finish(record, deployment, false, Some(&message))
            }
        }
    }

    /// Rollback records for a deployment, oldest first.
    pub fn list(&self, deployment_id: &str) -> RolloutResult<Vec<RollbackRecord>> {
        Ok(self.ctx.store.list_rollbacks(deployment_id)?)
    }

    pub fn get(&self, rollback_id: &str) -> RolloutResult<RollbackRecord> {
        self.ctx
            .store
            .get_rollback(rollback_id)?
            .ok_or_else(|| RolloutError::NotFound(format!("rollback {rollback_id}")))
    }

    /// Re-read a rollback under its deployment lock and check it is open.
    fn load_open(&self, rollback_id: &str) -> RolloutResult<(RollbackRecord, Deployment)> {
        let record = self.get(rollback_id)?;
        if !record.status.is_open() {
            return Err(RolloutError::Conflict(format!(
                "rollback {rollback_id} is already {:?}",
                record.status
            )));
        }
        let deployment = self.ctx.load_deployment(&record.deployment_id)?;
        if deployment.status != DeploymentStatus::RollingBack {
            return Err(RolloutError::Conflict(format!(
                "deployment {} is {}, not rolling back",
                deployment.id, deployment.status
            )));
        }
        Ok((record, deployment))
    }

    fn finish(
        &self,
        mut record: RollbackRecord,
        mut deployment: Deployment,
        success: bool,
        error_message: Option<&str>,
    ) -> RolloutResult<RollbackRecord> {
        let now = epoch_millis();
        record.completed_at = Some(now);
        deployment.completed_at = Some(now);
        deployment.updated_at = now;

        if success {
            record.status = RollbackStatus::Completed;
            deployment.status = DeploymentStatus::RolledBack;
            deployment.current_canary_percent = 0;
            deployment.status_message =
                Some(format!("rolled back to {}", deployment.stable_version));
        } else {
            let message = error_message.unwrap_or("rollback failed").to_string();
            record.status = RollbackStatus::Failed;
            record.error_message = Some(message.clone());
            deployment.status = DeploymentStatus::Failed;
            deployment.error_message = Some(message);
        }

        self.ctx.store.commit(
            &WriteBatch::new()
                .deployment(deployment.clone())
                .rollback(record.clone()),
        )?;
        if success {
            info!(deployment = %deployment.id, rollback = %record.id, "rollback completed");
        } else {
            warn!(
                deployment = %deployment.id,
                rollback = %record.id,
                error = ?record.error_message,
                "rollback failed"
            );
        }
        Ok(record)
    }
}
