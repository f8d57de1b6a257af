//! Metrics providers — where canary health numbers come from.
//!
//! The engine only needs a [`MetricsSnapshot`] per cycle. Real telemetry
//! backends implement [`MetricsProvider`]; the synthetic provider produces
//! plausible numbers for demos and local runs.

use std::sync::{Mutex, RwLock};

use canary_state::{Deployment, MetricsSnapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::BoxFuture;

/// Source of canary/stable health numbers.
pub trait MetricsProvider: Send + Sync {
    /// Fetch a fresh snapshot for `deployment`.
    fn fetch<'a>(&'a self, deployment: &'a Deployment)
    -> BoxFuture<'a, Result<MetricsSnapshot, String>>;
}

/// Fetch a snapshot and validate it at the provider boundary.
pub(crate) async fn fetch_validated(
    provider: &dyn MetricsProvider,
    deployment: &Deployment,
) -> Result<MetricsSnapshot, String> {
    let snapshot = provider.fetch(deployment).await?;
    snapshot
        .validate()
        .map_err(|e| format!("invalid snapshot: {e}"))?;
    Ok(snapshot)
}

/// Returns a fixed snapshot (or a fixed failure) that callers can swap.
pub struct StaticMetricsProvider {
    current: RwLock<Result<MetricsSnapshot, String>>,
}

impl StaticMetricsProvider {
    pub fn new(snapshot: MetricsSnapshot) -> Self {
        Self {
            current: RwLock::new(Ok(snapshot)),
        }
    }

    /// Replace the snapshot returned by subsequent fetches.
    pub fn set(&self, snapshot: MetricsSnapshot) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Ok(snapshot);
    }

    /// Make subsequent fetches fail with `message`.
    pub fn fail(&self, message: &str) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Err(message.to_string());
    }
}

impl MetricsProvider for StaticMetricsProvider {
    fn fetch<'a>(
        &'a self,
        _deployment: &'a Deployment,
    ) -> BoxFuture<'a, Result<MetricsSnapshot, String>> {
        Box::pin(async move {
            // Let other cycles interleave, as a real network fetch would.
            tokio::task::yield_now().await;
            self.current
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        })
    }
}

/// Synthesizes plausible canary numbers around configurable baselines.
pub struct SyntheticMetricsProvider {
    rng: Mutex<StdRng>,
    /// Requests per cycle across both versions.
    total_requests: u64,
    /// Mean error rate in percent.
    base_error_rate: f64,
    /// Mean latency in milliseconds.
    base_latency_ms: f64,
    /// Canary pod count.
    canary_pods: u32,
}

impl SyntheticMetricsProvider {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic provider for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            total_requests: 10_000,
            base_error_rate: 0.5,
            base_latency_ms: 80.0,
            canary_pods: 3,
        }
    }

    pub fn with_baseline(mut self, error_rate: f64, latency_ms: f64) -> Self {
        self.base_error_rate = error_rate.clamp(0.0, 100.0);
        self.base_latency_ms = latency_ms.max(0.0);
        self
    }

    pub fn with_canary_pods(mut self, pods: u32) -> Self {
        self.canary_pods = pods;
        self
    }

    fn generate(&self, canary_percent: u32) -> MetricsSnapshot {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());

        let jitter = rng.gen_range(0.9..1.1);
        let total = (self.total_requests as f64 * jitter) as u64;
        let canary_requests = total * u64::from(canary_percent) / 100;
        let stable_requests = total - canary_requests;

        let canary_error_rate =
            (self.base_error_rate * rng.gen_range(0.5..1.5)).clamp(0.0, 100.0);
        let stable_error_rate =
            (self.base_error_rate * rng.gen_range(0.5..1.5)).clamp(0.0, 100.0);
        let canary_errors = (canary_requests as f64 * canary_error_rate / 100.0) as u64;
        let stable_errors = (stable_requests as f64 * stable_error_rate / 100.0) as u64;

        let canary_healthy_pods = if rng.gen_bool(0.02) {
            self.canary_pods.saturating_sub(1)
        } else {
            self.canary_pods
        };

        MetricsSnapshot {
            canary_requests,
            canary_errors,
            canary_error_rate,
            stable_requests,
            stable_errors,
            stable_error_rate,
            canary_avg_latency_ms: self.base_latency_ms * rng.gen_range(0.8..1.3),
            stable_avg_latency_ms: self.base_latency_ms * rng.gen_range(0.8..1.2),
            canary_healthy_pods,
            canary_total_pods: self.canary_pods,
        }
    }
}

impl Default for SyntheticMetricsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsProvider for SyntheticMetricsProvider {
    fn fetch<'a>(
        &'a self,
        deployment: &'a Deployment,
    ) -> BoxFuture<'a, Result<MetricsSnapshot, String>> {
        let snapshot = self.generate(deployment.current_canary_percent);
        debug!(
            deployment = %deployment.id,
            error_rate = snapshot.canary_error_rate,
            latency_ms = snapshot.canary_avg_latency_ms,
            "synthesized canary metrics"
        );
        Box::pin(async move { Ok(snapshot) })
    }
}
