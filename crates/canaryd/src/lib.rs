//! canaryd — assembly of the canary daemon.
//!
//! Turns a [`DaemonConfig`] into a store and a [`CanaryEngine`]; the binary
//! adds the progression loop and the HTTP server on top.

pub mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use canary_rollout::{
    CanaryEngine, HttpAdvisory, MetricsProvider, RolloutContext, StaticMetricsProvider,
    SyntheticMetricsProvider, TemplateAdvisory,
};
use canary_state::{MetricsSnapshot, RolloutStore, StateStore};
use tracing::info;

use config::{AdvisoryKind, MetricsConfig, MetricsProviderKind};

pub use config::DaemonConfig;

/// File name of the redb database inside the data directory.
pub const DB_FILE: &str = "canary.redb";

/// Open (or create) the store under `data_dir`.
pub fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(DB_FILE);
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

fn static_snapshot(config: &MetricsConfig) -> MetricsSnapshot {
    let canary_requests = 1_000;
    let stable_requests = 9_000;
    MetricsSnapshot {
        canary_requests,
        canary_errors: (canary_requests as f64 * config.error_rate / 100.0) as u64,
        canary_error_rate: config.error_rate,
        stable_requests,
        stable_errors: (stable_requests as f64 * config.error_rate / 100.0) as u64,
        stable_error_rate: config.error_rate,
        canary_avg_latency_ms: config.latency_ms,
        stable_avg_latency_ms: config.latency_ms,
        canary_healthy_pods: config.canary_pods,
        canary_total_pods: config.canary_pods,
    }
}

fn metrics_provider(config: &MetricsConfig) -> Arc<dyn MetricsProvider> {
    match config.provider {
        MetricsProviderKind::Static => {
            Arc::new(StaticMetricsProvider::new(static_snapshot(config)))
        }
        MetricsProviderKind::Synthetic => {
            let provider = match config.seed {
                Some(seed) => SyntheticMetricsProvider::seeded(seed),
                None => SyntheticMetricsProvider::new(),
            };
            Arc::new(
                provider
                    .with_baseline(config.error_rate, config.latency_ms)
                    .with_canary_pods(config.canary_pods),
            )
        }
    }
}

/// Wire an engine over `store` with the collaborators named in `config`.
pub fn build_engine(
    config: &DaemonConfig,
    store: Arc<dyn RolloutStore>,
) -> anyhow::Result<CanaryEngine> {
    let mut ctx = RolloutContext::new(store)
        .with_metrics(metrics_provider(&config.metrics))
        .with_advisory_timeout(Duration::from_millis(config.engine.advisory_timeout_ms));

    ctx = match config.advisory.kind {
        AdvisoryKind::None => ctx,
        AdvisoryKind::Template => ctx.with_advisory(Arc::new(TemplateAdvisory)),
        AdvisoryKind::Http => {
            let endpoint = config
                .advisory
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("advisory.endpoint is required for http advisory"))?;
            ctx.with_advisory(Arc::new(HttpAdvisory::new(endpoint, &config.advisory.path)))
        }
    };

    info!(
        metrics = ?config.metrics.provider,
        advisory = ?config.advisory.kind,
        "canary engine assembled"
    );
    Ok(CanaryEngine::new(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_snapshot_is_valid() {
        let snapshot = static_snapshot(&MetricsConfig {
            error_rate: 2.0,
            ..MetricsConfig::default()
        });
        snapshot.validate().unwrap();
        assert_eq!(snapshot.canary_errors, 20);
    }

    #[test]
    fn http_advisory_without_endpoint_fails() {
        let mut config = DaemonConfig::default();
        config.advisory.kind = AdvisoryKind::Http;
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        assert!(build_engine(&config, store).is_err());
    }

    #[test]
    fn open_store_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested/data");
        open_store(&data_dir).unwrap();
        assert!(data_dir.join(DB_FILE).exists());
    }
}
