//! Progression controller — drives the canary state machine.
//!
//! ```text
//! pending → initializing → progressing ⇄ paused
//!                          progressing → promoting → promoted
//!           initializing/progressing → rolling_back → rolled_back | failed
//!           any non-terminal → cancelled
//! ```
//!
//! Every mutating call holds the deployment's lock across
//! fetch → decide → persist, and writes its changes as one batch. While the
//! deployment is `initializing` or `progressing` exactly one step is
//! `running`; in every other state none is. Pausing parks the running step
//! back to `pending` and resuming restarts it.

use std::sync::Arc;

use canary_state::{
    Deployment, DeploymentStatus, HealthThresholds, MetricsSnapshot, RollbackPolicy,
    RollbackStatus, RollbackTrigger, Step, StepStatus, TrafficSplit, WriteBatch,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::advisory::explain_best_effort;
use crate::analyzer::{Analysis, analyze};
use crate::engine::{DeploymentView, RolloutContext};
use crate::epoch_millis;
use crate::error::{RolloutError, RolloutResult};
use crate::planner::plan_steps;
use crate::providers::fetch_validated;
use crate::recorder::build_record;
use crate::rollback::prepare_initiate;

/// Actor recorded on rollbacks the engine triggers itself.
pub const SYSTEM_ACTOR: &str = "system";

/// Input for creating a canary deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub stable_version: String,
    #[serde(default)]
    pub stable_image: Option<String>,
    pub canary_version: String,
    #[serde(default)]
    pub canary_image: Option<String>,
    #[serde(default)]
    pub traffic_split: TrafficSplit,
    pub initial_percent: u32,
    #[serde(default = "default_target_percent")]
    pub target_percent: u32,
    pub increment_percent: u32,
    #[serde(default = "default_interval_minutes")]
    pub increment_interval_minutes: u32,
    #[serde(default)]
    pub thresholds: HealthThresholds,
    #[serde(default)]
    pub rollback_policy: RollbackPolicy,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_target_percent() -> u32 {
    100
}

fn default_interval_minutes() -> u32 {
    5
}

impl DeploymentRequest {
    fn validate(&self) -> RolloutResult<()> {
        for (field, value) in [
            ("name", &self.name),
            ("namespace", &self.namespace),
            ("stable_version", &self.stable_version),
            ("canary_version", &self.canary_version),
        ] {
            if value.trim().is_empty() {
                return Err(RolloutError::InvalidConfig(format!("{field} must not be empty")));
            }
        }
        let t = &self.thresholds;
        for (field, value) in [
            ("error_rate_threshold", t.error_rate_threshold),
            ("success_rate_threshold", t.success_rate_threshold),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(RolloutError::InvalidConfig(format!(
                    "{field} must be within 0..=100, got {value}"
                )));
            }
        }
        if !t.latency_threshold_ms.is_finite() || t.latency_threshold_ms < 0.0 {
            return Err(RolloutError::InvalidConfig(format!(
                "latency_threshold_ms must be non-negative, got {}",
                t.latency_threshold_ms
            )));
        }
        Ok(())
    }
}

/// What one progression cycle did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CycleAction {
    /// Moved to the next step.
    Advanced { step_number: u32, percent: u32 },
    /// Last step passed; canary now serves the target percent.
    Promoted { percent: u32 },
    /// Last step passed; waiting for an operator to promote.
    AwaitingApproval { step_number: u32 },
    /// Analysis breached a rollback rule.
    RollbackInitiated { rollback_id: String },
    /// Inconclusive or degraded without rollback; retry next tick.
    Held,
    /// The metrics provider had nothing usable this cycle.
    NoData { reason: String },
    /// The deployment is in a state where cycles do nothing.
    Skipped { status: DeploymentStatus },
}

/// Result of [`ProgressionController::progress`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub deployment_id: String,
    #[serde(flatten)]
    pub action: CycleAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
}

impl CycleReport {
    fn new(deployment_id: &str, action: CycleAction) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            action,
            analysis: None,
            advisory: None,
        }
    }
}

/// Input for an advisory request made after the lock is released.
struct AdvisoryInput {
    deployment: Deployment,
    snapshot: MetricsSnapshot,
}

fn running_index(steps: &[Step]) -> Option<usize> {
    steps.iter().position(|s| s.status == StepStatus::Running)
}

fn first_pending_index(steps: &[Step]) -> Option<usize> {
    steps.iter().position(|s| s.status == StepStatus::Pending)
}

fn mark_promoted(deployment: &mut Deployment, now: u64) {
    deployment.status = DeploymentStatus::Promoted;
    deployment.current_canary_percent = deployment.target_percent;
    deployment.completed_at = Some(now);
    deployment.last_progress_at = Some(now);
    deployment.updated_at = now;
    deployment.status_message = Some(format!(
        "promoted {} to {}%",
        deployment.canary_version, deployment.target_percent
    ));
}

/// Drives deployments through their step ladder.
#[derive(Clone)]
pub struct ProgressionController {
    ctx: Arc<RolloutContext>,
}

impl ProgressionController {
    pub fn new(ctx: Arc<RolloutContext>) -> Self {
        Self { ctx }
    }

    /// Persist a new `pending` deployment with its full `pending` ladder.
    pub fn create(&self, request: DeploymentRequest) -> RolloutResult<DeploymentView> {
        request.validate()?;
        let ladder = plan_steps(
            request.initial_percent,
            request.target_percent,
            request.increment_percent,
        )?;

        let now = epoch_millis();
        let id = uuid::Uuid::new_v4().to_string();
        let deployment = Deployment {
            id: id.clone(),
            name: request.name,
            namespace: request.namespace,
            stable_version: request.stable_version,
            stable_image: request.stable_image,
            canary_version: request.canary_version,
            canary_image: request.canary_image,
            traffic_split: request.traffic_split,
            initial_percent: request.initial_percent,
            target_percent: request.target_percent,
            increment_percent: request.increment_percent,
            increment_interval_minutes: request.increment_interval_minutes,
            thresholds: request.thresholds,
            rollback_policy: request.rollback_policy,
            status: DeploymentStatus::Pending,
            current_canary_percent: 0,
            status_message: None,
            error_message: None,
            created_by: request.created_by,
            created_at: now,
            updated_at: now,
            started_at: None,
            last_progress_at: None,
            completed_at: None,
        };
        let steps: Vec<Step> = ladder
            .iter()
            .enumerate()
            .map(|(i, percent)| Step::pending(&id, i as u32 + 1, *percent))
            .collect();

        self.ctx.store.commit(
            &WriteBatch::new()
                .deployment(deployment.clone())
                .steps(steps.clone()),
        )?;
        info!(
            deployment = %id,
            workload = %format!("{}/{}", deployment.namespace, deployment.name),
            canary = %deployment.canary_version,
            steps = steps.len(),
            "canary deployment created"
        );
        Ok(DeploymentView { deployment, steps })
    }

    /// `pending | paused → initializing`: run the first pending step.
    pub async fn start(&self, id: &str) -> RolloutResult<Deployment> {
        let _guard = self.ctx.locks.acquire(id).await;
        let mut deployment = self.ctx.load_deployment(id)?;
        if !matches!(
            deployment.status,
            DeploymentStatus::Pending | DeploymentStatus::Paused
        ) {
            return Err(RolloutError::Conflict(format!(
                "deployment {id} is {}; only pending or paused deployments can start",
                deployment.status
            )));
        }

        let mut steps = self.ctx.store.list_steps(id)?;
        let idx = first_pending_index(&steps).ok_or_else(|| {
            RolloutError::Conflict(format!("deployment {id} has no pending step to start"))
        })?;
        let percent = steps[idx].target_percent;
        self.ctx.apply_canary_percent(&deployment, percent).await?;

        let now = epoch_millis();
        let step = &mut steps[idx];
        step.status = StepStatus::Running;
        step.started_at.get_or_insert(now);

        deployment.status = DeploymentStatus::Initializing;
        deployment.current_canary_percent = percent;
        deployment.started_at.get_or_insert(now);
        deployment.last_progress_at = Some(now);
        deployment.updated_at = now;
        deployment.status_message = Some(format!("step {} at {percent}%", step.step_number));

        self.ctx.store.commit(
            &WriteBatch::new()
                .deployment(deployment.clone())
                .step(step.clone()),
        )?;
        info!(deployment = %id, step = step.step_number, percent, "canary rollout started");
        Ok(deployment)
    }

    /// Run one analysis cycle and apply its decision.
    pub async fn progress(&self, id: &str) -> RolloutResult<CycleReport> {
        let (mut report, advisory_input) = {
            let _guard = self.ctx.locks.acquire(id).await;
            self.progress_locked(id).await?
        };

        // Advisory text is requested only after the decision is persisted.
        if let (Some(input), Some(generator), Some(analysis)) =
            (advisory_input, &self.ctx.advisory, &report.analysis)
        {
            report.advisory = explain_best_effort(
                generator.as_ref(),
                &input.deployment,
                &input.snapshot,
                &analysis.reasons,
                self.ctx.advisory_timeout,
            )
            .await;
            if let Some(text) = &report.advisory {
                info!(
                    deployment = %id,
                    result = %analysis.result,
                    advisory = %text,
                    "canary advisory"
                );
            }
        }
        Ok(report)
    }

    async fn progress_locked(
        &self,
        id: &str,
    ) -> RolloutResult<(CycleReport, Option<AdvisoryInput>)> {
        let mut deployment = self.ctx.load_deployment(id)?;
        match deployment.status {
            DeploymentStatus::Initializing | DeploymentStatus::Progressing => {}
            DeploymentStatus::Paused
            | DeploymentStatus::Promoting
            | DeploymentStatus::RollingBack => {
                debug!(deployment = %id, status = %deployment.status, "cycle skipped");
                let action = CycleAction::Skipped {
                    status: deployment.status,
                };
                return Ok((CycleReport::new(id, action), None));
            }
            status => {
                return Err(RolloutError::Conflict(format!(
                    "deployment {id} is {status}; nothing to progress"
                )));
            }
        }

        let mut steps = self.ctx.store.list_steps(id)?;
        let current = running_index(&steps).ok_or_else(|| {
            RolloutError::Conflict(format!("deployment {id} has no running step"))
        })?;

        let snapshot = match fetch_validated(self.ctx.metrics.as_ref(), &deployment).await {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                warn!(deployment = %id, %reason, "no usable metrics this cycle");
                return Ok((CycleReport::new(id, CycleAction::NoData { reason }), None));
            }
        };

        let analysis = analyze(&deployment, &snapshot);
        let now = epoch_millis();
        let record = build_record(
            &deployment,
            Some(&steps[current]),
            &snapshot,
            analysis.result,
            &analysis.reasons,
            now,
        );
        let mut batch = WriteBatch::new().metrics(record);

        let action = if analysis.should_rollback {
            let reason = analysis
                .reasons
                .first()
                .cloned()
                .unwrap_or_else(|| "canary health check failed".to_string());
            let (rollback, changed_steps) = prepare_initiate(
                &self.ctx,
                &mut deployment,
                &mut steps,
                &reason,
                RollbackTrigger::AutoHealthCheck,
                Some(SYSTEM_ACTOR),
                now,
            )?;
            warn!(
                deployment = %id,
                step = ?rollback.step_number_at_trigger,
                percent = rollback.canary_percent_at_trigger,
                %reason,
                "canary unhealthy, rolling back"
            );
            let rollback_id = rollback.id.clone();
            batch = batch
                .deployment(deployment.clone())
                .steps(changed_steps)
                .rollback(rollback);
            CycleAction::RollbackInitiated { rollback_id }
        } else if analysis.should_advance {
            let completed = {
                let step = &mut steps[current];
                step.status = StepStatus::Completed;
                step.completed_at = Some(now);
                step.clone()
            };
            match steps.get(current + 1).cloned() {
                Some(mut next) => {
                    self.ctx
                        .apply_canary_percent(&deployment, next.target_percent)
                        .await?;
                    next.status = StepStatus::Running;
                    next.started_at = Some(now);

                    deployment.status = DeploymentStatus::Progressing;
                    deployment.current_canary_percent = next.target_percent;
                    deployment.last_progress_at = Some(now);
                    deployment.updated_at = now;
                    deployment.status_message = Some(format!(
                        "step {} of {} at {}%",
                        next.step_number,
                        steps.len(),
                        next.target_percent
                    ));
                    info!(
                        deployment = %id,
                        step = next.step_number,
                        percent = next.target_percent,
                        "canary advanced"
                    );
                    let action = CycleAction::Advanced {
                        step_number: next.step_number,
                        percent: next.target_percent,
                    };
                    batch = batch
                        .deployment(deployment.clone())
                        .step(completed)
                        .step(next);
                    action
                }
                None if deployment.rollback_policy.require_manual_approval => {
                    deployment.status = DeploymentStatus::Promoting;
                    deployment.last_progress_at = Some(now);
                    deployment.updated_at = now;
                    deployment.status_message = Some("awaiting manual approval".to_string());
                    info!(deployment = %id, "final step passed, awaiting approval");
                    let action = CycleAction::AwaitingApproval {
                        step_number: completed.step_number,
                    };
                    batch = batch.deployment(deployment.clone()).step(completed);
                    action
                }
                None => {
                    self.ctx
                        .apply_canary_percent(&deployment, deployment.target_percent)
                        .await?;
                    mark_promoted(&mut deployment, now);
                    info!(deployment = %id, percent = deployment.target_percent, "canary promoted");
                    batch = batch.deployment(deployment.clone()).step(completed);
                    CycleAction::Promoted {
                        percent: deployment.target_percent,
                    }
                }
            }
        } else {
            debug!(deployment = %id, result = %analysis.result, "holding current step");
            CycleAction::Held
        };

        self.ctx.store.commit(&batch)?;

        let advisory_input = analysis.wants_advisory().then(|| AdvisoryInput {
            deployment,
            snapshot,
        });
        let report = CycleReport {
            deployment_id: id.to_string(),
            action,
            analysis: Some(analysis),
            advisory: None,
        };
        Ok((report, advisory_input))
    }

    /// Promote to the target percent now, skipping any remaining steps.
    ///
    /// Used to approve a deployment held in `promoting`, or to force an
    /// early promotion.
    pub async fn promote(&self, id: &str) -> RolloutResult<Deployment> {
        let _guard = self.ctx.locks.acquire(id).await;
        let mut deployment = self.ctx.load_deployment(id)?;
        if !matches!(
            deployment.status,
            DeploymentStatus::Initializing
                | DeploymentStatus::Progressing
                | DeploymentStatus::Paused
                | DeploymentStatus::Promoting
        ) {
            return Err(RolloutError::Conflict(format!(
                "deployment {id} is {}; cannot promote",
                deployment.status
            )));
        }

        self.ctx
            .apply_canary_percent(&deployment, deployment.target_percent)
            .await?;

        let now = epoch_millis();
        let mut changed = Vec::new();
        for mut step in self.ctx.store.list_steps(id)? {
            // A parked step (paused) has already started.
            let in_flight = step.status == StepStatus::Running
                || (step.status == StepStatus::Pending && step.started_at.is_some());
            if in_flight {
                step.status = StepStatus::Completed;
                step.completed_at = Some(now);
                changed.push(step);
            } else if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
                changed.push(step);
            }
        }
        mark_promoted(&mut deployment, now);

        self.ctx.store.commit(
            &WriteBatch::new()
                .deployment(deployment.clone())
                .steps(changed),
        )?;
        info!(deployment = %id, percent = deployment.target_percent, "canary promoted by operator");
        Ok(deployment)
    }

    /// `initializing | progressing → paused`. The running step is parked
    /// as `pending`; the canary percent is untouched.
    pub async fn pause(&self, id: &str) -> RolloutResult<Deployment> {
        let _guard = self.ctx.locks.acquire(id).await;
        let mut deployment = self.ctx.load_deployment(id)?;
        if !deployment.status.has_running_step() {
            return Err(RolloutError::Conflict(format!(
                "deployment {id} is {}; only a running rollout can be paused",
                deployment.status
            )));
        }

        let mut steps = self.ctx.store.list_steps(id)?;
        let idx = running_index(&steps).ok_or_else(|| {
            RolloutError::Conflict(format!("deployment {id} has no running step"))
        })?;
        steps[idx].status = StepStatus::Pending;

        let now = epoch_millis();
        deployment.status = DeploymentStatus::Paused;
        deployment.updated_at = now;
        deployment.status_message = Some(format!(
            "paused at step {} ({}%)",
            steps[idx].step_number, deployment.current_canary_percent
        ));

        self.ctx.store.commit(
            &WriteBatch::new()
                .deployment(deployment.clone())
                .step(steps[idx].clone()),
        )?;
        info!(deployment = %id, step = steps[idx].step_number, "canary rollout paused");
        Ok(deployment)
    }

    /// `paused → progressing`. Restarts the parked step.
    pub async fn resume(&self, id: &str) -> RolloutResult<Deployment> {
        let _guard = self.ctx.locks.acquire(id).await;
        let mut deployment = self.ctx.load_deployment(id)?;
        if deployment.status != DeploymentStatus::Paused {
            return Err(RolloutError::Conflict(format!(
                "deployment {id} is {}; only a paused rollout can be resumed",
                deployment.status
            )));
        }

        let mut steps = self.ctx.store.list_steps(id)?;
        let idx = first_pending_index(&steps).ok_or_else(|| {
            RolloutError::Conflict(format!("deployment {id} has no step to resume"))
        })?;
        let now = epoch_millis();
        steps[idx].status = StepStatus::Running;
        steps[idx].started_at.get_or_insert(now);

        deployment.status = DeploymentStatus::Progressing;
        deployment.updated_at = now;
        deployment.status_message = Some(format!(
            "resumed at step {} ({}%)",
            steps[idx].step_number, deployment.current_canary_percent
        ));

        self.ctx.store.commit(
            &WriteBatch::new()
                .deployment(deployment.clone())
                .step(steps[idx].clone()),
        )?;
        info!(deployment = %id, step = steps[idx].step_number, "canary rollout resumed");
        Ok(deployment)
    }

    /// Cancel a non-terminal deployment.
    ///
    /// Pending steps become `skipped`. The step in flight, if any, is closed
    /// as `failed`, and an open rollback is closed as `failed`. Traffic is
    /// returned to stable.
    pub async fn cancel(&self, id: &str, reason: Option<&str>) -> RolloutResult<Deployment> {
        let _guard = self.ctx.locks.acquire(id).await;
        let mut deployment = self.ctx.load_deployment(id)?;
        if deployment.status.is_terminal() {
            return Err(RolloutError::Conflict(format!(
                "deployment {id} is already {}",
                deployment.status
            )));
        }

        if deployment.current_canary_percent > 0 {
            self.ctx.restore_stable(&deployment).await?;
        }

        let now = epoch_millis();
        let mut batch = WriteBatch::new();
        for mut step in self.ctx.store.list_steps(id)? {
            match step.status {
                StepStatus::Pending => {
                    step.status = StepStatus::Skipped;
                    batch = batch.step(step);
                }
                StepStatus::Running => {
                    step.status = StepStatus::Failed;
                    step.completed_at = Some(now);
                    batch = batch.step(step);
                }
                _ => {}
            }
        }
        for mut rollback in self.ctx.store.list_rollbacks(id)? {
            if rollback.status.is_open() {
                rollback.status = RollbackStatus::Failed;
                rollback.error_message = Some("deployment cancelled".to_string());
                rollback.completed_at = Some(now);
                batch = batch.rollback(rollback);
            }
        }

        deployment.status = DeploymentStatus::Cancelled;
        deployment.current_canary_percent = 0;
        deployment.completed_at = Some(now);
        deployment.updated_at = now;
        deployment.status_message = Some(reason.unwrap_or("cancelled").to_string());

        self.ctx
            .store
            .commit(&batch.deployment(deployment.clone()))?;
        info!(deployment = %id, "canary rollout cancelled");
        Ok(deployment)
    }
}
