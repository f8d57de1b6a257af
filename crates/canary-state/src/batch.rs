//! WriteBatch — a set of upserts applied in one write transaction.

use crate::types::{Deployment, MetricsRecord, RollbackRecord, Step};

/// Rows to upsert atomically.
///
/// Controllers assemble every change a transition makes into one batch and
/// hand it to [`crate::RolloutStore::commit`]. A failed commit leaves the
/// store exactly as it was.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub deployments: Vec<Deployment>,
    pub steps: Vec<Step>,
    pub metrics: Vec<MetricsRecord>,
    pub rollbacks: Vec<RollbackRecord>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deployment(mut self, deployment: Deployment) -> Self {
        self.deployments.push(deployment);
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn metrics(mut self, record: MetricsRecord) -> Self {
        self.metrics.push(record);
        self
    }

    pub fn rollback(mut self, record: RollbackRecord) -> Self {
        self.rollbacks.push(record);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
            && self.steps.is_empty()
            && self.metrics.is_empty()
            && self.rollbacks.is_empty()
    }

    /// Total number of rows in the batch.
    pub fn len(&self) -> usize {
        self.deployments.len() + self.steps.len() + self.metrics.len() + self.rollbacks.len()
    }
}
