//! Metrics recorder — append-only audit trail of analysis cycles.
//!
//! Records are written for trend charts and post-mortems. The progression
//! controller never reads them back: every cycle decides from a fresh
//! snapshot.

use std::sync::Arc;

use canary_state::{
    AnalysisResult, Deployment, MetricsRecord, MetricsSnapshot, RolloutStore, Step, WriteBatch,
};
use tracing::debug;

use crate::epoch_millis;
use crate::error::{RolloutError, RolloutResult};

/// Appends analysis records to the store.
#[derive(Clone)]
pub struct MetricsRecorder {
    store: Arc<dyn RolloutStore>,
}

impl MetricsRecorder {
    pub fn new(store: Arc<dyn RolloutStore>) -> Self {
        Self { store }
    }

    /// Append one record for `deployment_id`, optionally tagged to `step`.
    pub fn record(
        &self,
        deployment_id: &str,
        step: Option<&Step>,
        snapshot: &MetricsSnapshot,
        result: AnalysisResult,
        reasons: &[String],
    ) -> RolloutResult<MetricsRecord> {
        let deployment = self
            .store
            .get_deployment(deployment_id)?
            .ok_or_else(|| RolloutError::NotFound(format!("deployment {deployment_id}")))?;
        if let Some(step) = step
            && step.deployment_id != deployment_id
        {
            return Err(RolloutError::Conflict(format!(
                "step {} belongs to deployment {}",
                step.id, step.deployment_id
            )));
        }

        let record = build_record(&deployment, step, snapshot, result, reasons, epoch_millis());
        self.store.commit(&WriteBatch::new().metrics(record.clone()))?;
        Ok(record)
    }

    /// Latest `limit` records, newest first.
    pub fn latest(&self, deployment_id: &str, limit: usize) -> RolloutResult<Vec<MetricsRecord>> {
        Ok(self.store.list_metrics(deployment_id, limit)?)
    }
}

/// Build a record without persisting it, for inclusion in a cycle's batch.
pub(crate) fn build_record(
    deployment: &Deployment,
    step: Option<&Step>,
    snapshot: &MetricsSnapshot,
    result: AnalysisResult,
    reasons: &[String],
    now: u64,
) -> MetricsRecord {
    let record = MetricsRecord {
        id: uuid::Uuid::new_v4().to_string(),
        deployment_id: deployment.id.clone(),
        step_id: step.map(|s| s.id.clone()),
        step_number: step.map(|s| s.step_number),
        canary_percent: deployment.current_canary_percent,
        snapshot: snapshot.clone(),
        analysis_result: result,
        reasons: reasons.to_vec(),
        recorded_at: now,
    };
    debug!(
        deployment = %deployment.id,
        step = ?record.step_number,
        result = %result,
        "analysis record built"
    );
    record
}
