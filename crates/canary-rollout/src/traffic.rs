//! Traffic controller seam — enforces the intended canary percent.
//!
//! The engine decides and records the percent; a `TrafficController`
//! applies it to the mesh, ingress, or orchestrator. Both operations must be
//! idempotent: a retried cycle may apply the same percent twice.

use canary_state::Deployment;
use tracing::info;

use crate::BoxFuture;

/// Applies traffic splits for a canary deployment.
pub trait TrafficController: Send + Sync {
    /// Route `percent` of traffic to the canary.
    fn apply_canary_percent<'a>(
        &'a self,
        deployment: &'a Deployment,
        percent: u32,
    ) -> BoxFuture<'a, Result<(), String>>;

    /// Route all traffic back to the stable version.
    fn restore_stable<'a>(
        &'a self,
        deployment: &'a Deployment,
    ) -> BoxFuture<'a, Result<(), String>>;
}

/// Records intent in the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrafficController;

impl TrafficController for NoopTrafficController {
    fn apply_canary_percent<'a>(
        &'a self,
        deployment: &'a Deployment,
        percent: u32,
    ) -> BoxFuture<'a, Result<(), String>> {
        info!(
            deployment = %deployment.id,
            workload = %format!("{}/{}", deployment.namespace, deployment.name),
            percent,
            "canary traffic weight set"
        );
        Box::pin(async { Ok(()) })
    }

    fn restore_stable<'a>(
        &'a self,
        deployment: &'a Deployment,
    ) -> BoxFuture<'a, Result<(), String>> {
        info!(
            deployment = %deployment.id,
            version = %deployment.stable_version,
            "traffic restored to stable"
        );
        Box::pin(async { Ok(()) })
    }
}
