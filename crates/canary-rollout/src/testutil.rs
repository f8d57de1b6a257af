//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use canary_state::*;

use crate::BoxFuture;
use crate::engine::{CanaryEngine, RolloutContext};
use crate::providers::StaticMetricsProvider;
use crate::traffic::TrafficController;

pub fn healthy_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        canary_requests: 1_000,
        canary_errors: 5,
        canary_error_rate: 0.5,
        stable_requests: 9_000,
        stable_errors: 45,
        stable_error_rate: 0.5,
        canary_avg_latency_ms: 80.0,
        stable_avg_latency_ms: 75.0,
        canary_healthy_pods: 3,
        canary_total_pods: 3,
    }
}

pub fn unhealthy_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        canary_errors: 80,
        canary_error_rate: 8.0,
        ..healthy_snapshot()
    }
}

pub fn test_deployment() -> Deployment {
    Deployment {
        id: "d-test".to_string(),
        name: "checkout".to_string(),
        namespace: "prod".to_string(),
        stable_version: "v1".to_string(),
        stable_image: Some("registry/checkout:v1".to_string()),
        canary_version: "v2".to_string(),
        canary_image: Some("registry/checkout:v2".to_string()),
        traffic_split: TrafficSplit::Percentage,
        initial_percent: 10,
        target_percent: 100,
        increment_percent: 10,
        increment_interval_minutes: 5,
        thresholds: HealthThresholds {
            error_rate_threshold: 5.0,
            latency_threshold_ms: 500.0,
            success_rate_threshold: 95.0,
            min_healthy_pods: 1,
        },
        rollback_policy: RollbackPolicy::default(),
        status: DeploymentStatus::Progressing,
        current_canary_percent: 10,
        status_message: None,
        error_message: None,
        created_by: None,
        created_at: 1_000,
        updated_at: 1_000,
        started_at: Some(1_000),
        last_progress_at: Some(1_000),
        completed_at: None,
    }
}

pub fn request(initial: u32, target: u32, increment: u32) -> crate::DeploymentRequest {
    crate::DeploymentRequest {
        name: "checkout".to_string(),
        namespace: "prod".to_string(),
        stable_version: "v1".to_string(),
        stable_image: Some("registry/checkout:v1".to_string()),
        canary_version: "v2".to_string(),
        canary_image: Some("registry/checkout:v2".to_string()),
        traffic_split: TrafficSplit::Percentage,
        initial_percent: initial,
        target_percent: target,
        increment_percent: increment,
        increment_interval_minutes: 5,
        thresholds: HealthThresholds::default(),
        rollback_policy: RollbackPolicy::default(),
        created_by: Some("tester".to_string()),
    }
}

/// Delegates to a real store but can be told to fail every commit.
pub struct FlakyStore {
    inner: StateStore,
    fail_commits: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: StateStore::open_in_memory().unwrap(),
            fail_commits: AtomicBool::new(false),
        }
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl RolloutStore for FlakyStore {
    fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        self.inner.get_deployment(id)
    }
    fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        self.inner.list_deployments()
    }
    fn list_steps(&self, deployment_id: &str) -> StateResult<Vec<Step>> {
        self.inner.list_steps(deployment_id)
    }
    fn list_metrics(&self, deployment_id: &str, limit: usize) -> StateResult<Vec<MetricsRecord>> {
        self.inner.list_metrics(deployment_id, limit)
    }
    fn get_rollback(&self, id: &str) -> StateResult<Option<RollbackRecord>> {
        self.inner.get_rollback(id)
    }
    fn list_rollbacks(&self, deployment_id: &str) -> StateResult<Vec<RollbackRecord>> {
        self.inner.list_rollbacks(deployment_id)
    }
    fn commit(&self, batch: &WriteBatch) -> StateResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StateError::Unavailable("injected commit failure".to_string()));
        }
        self.inner.commit(batch)
    }
    fn delete_deployment(&self, id: &str) -> StateResult<bool> {
        self.inner.delete_deployment(id)
    }
}

/// Records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingTraffic {
    pub applied: Mutex<Vec<u32>>,
    pub restores: AtomicU32,
    fail: AtomicBool,
}

impl RecordingTraffic {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<u32> {
        self.applied.lock().unwrap().clone()
    }
}

impl TrafficController for RecordingTraffic {
    fn apply_canary_percent<'a>(
        &'a self,
        _deployment: &'a Deployment,
        percent: u32,
    ) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err("mesh api unreachable".to_string());
            }
            self.applied.lock().unwrap().push(percent);
            Ok(())
        })
    }

    fn restore_stable<'a>(
        &'a self,
        _deployment: &'a Deployment,
    ) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err("mesh api unreachable".to_string());
            }
            self.restores.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Engine wired to controllable collaborators.
pub struct Harness {
    pub engine: CanaryEngine,
    pub store: Arc<FlakyStore>,
    pub metrics: Arc<StaticMetricsProvider>,
    pub traffic: Arc<RecordingTraffic>,
}

pub fn harness() -> Harness {
    let store = Arc::new(FlakyStore::new());
    let metrics = Arc::new(StaticMetricsProvider::new(healthy_snapshot()));
    let traffic = Arc::new(RecordingTraffic::default());
    let ctx = RolloutContext::new(store.clone())
        .with_metrics(metrics.clone())
        .with_traffic(traffic.clone());
    Harness {
        engine: CanaryEngine::new(ctx),
        store,
        metrics,
        traffic,
    }
}

impl Harness {
    /// Snapshot of everything persisted for a deployment.
    pub fn persisted(&self, id: &str) -> (Deployment, Vec<Step>, Vec<RollbackRecord>, usize) {
        let deployment = self.store.get_deployment(id).unwrap().unwrap();
        let steps = self.store.list_steps(id).unwrap();
        let rollbacks = self.store.list_rollbacks(id).unwrap();
        let metrics = self.store.list_metrics(id, usize::MAX).unwrap().len();
        (deployment, steps, rollbacks, metrics)
    }

    pub fn running_steps(&self, id: &str) -> usize {
        self.store
            .list_steps(id)
            .unwrap()
            .iter()
            .filter(|s| s.status == StepStatus::Running)
            .count()
    }
}
