//! Health analyzer — judges a canary snapshot against deployment thresholds.
//!
//! Pure: the same deployment and snapshot always produce the same
//! [`Analysis`]. The advisory text for degraded or unhealthy results is
//! requested elsewhere, after the decision has been persisted.

use canary_state::{AnalysisResult, Deployment, MetricsSnapshot};
use serde::Serialize;

/// Verdict for one analysis cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    /// No threshold was breached.
    pub is_healthy: bool,
    /// A breach matched an enabled rollback policy.
    pub should_rollback: bool,
    /// Healthy and above the success-rate bar: move to the next step.
    /// Whether that step is the last one (promotion) is decided by the
    /// progression controller.
    pub should_advance: bool,
    pub result: AnalysisResult,
    /// One entry per breached threshold, in evaluation order.
    pub reasons: Vec<String>,
}

/// Evaluate `snapshot` against `deployment`'s thresholds and rollback policy.
pub fn analyze(deployment: &Deployment, snapshot: &MetricsSnapshot) -> Analysis {
    let thresholds = &deployment.thresholds;
    let policy = &deployment.rollback_policy;

    let mut is_healthy = true;
    let mut should_rollback = false;
    let mut reasons = Vec::new();

    if snapshot.canary_error_rate > thresholds.error_rate_threshold {
        is_healthy = false;
        reasons.push(format!(
            "canary error rate {:.2}% exceeds threshold {:.2}%",
            snapshot.canary_error_rate, thresholds.error_rate_threshold
        ));
        if policy.auto_rollback_enabled && policy.rollback_on_error_rate {
            should_rollback = true;
        }
    }

    if snapshot.canary_avg_latency_ms > thresholds.latency_threshold_ms {
        is_healthy = false;
        reasons.push(format!(
            "canary latency {:.0}ms exceeds threshold {:.0}ms",
            snapshot.canary_avg_latency_ms, thresholds.latency_threshold_ms
        ));
        if policy.auto_rollback_enabled && policy.rollback_on_latency {
            should_rollback = true;
        }
    }

    if snapshot.canary_healthy_pods < thresholds.min_healthy_pods {
        is_healthy = false;
        reasons.push(format!(
            "healthy canary pods {} below minimum {}",
            snapshot.canary_healthy_pods, thresholds.min_healthy_pods
        ));
        if policy.auto_rollback_enabled && policy.rollback_on_pod_failure {
            should_rollback = true;
        }
    }

    let should_advance =
        is_healthy && snapshot.canary_success_rate() >= thresholds.success_rate_threshold;

    let result = if should_rollback {
        AnalysisResult::Unhealthy
    } else if is_healthy && should_advance {
        AnalysisResult::Healthy
    } else if !is_healthy {
        AnalysisResult::Degraded
    } else {
        AnalysisResult::Inconclusive
    };

    Analysis {
        is_healthy,
        should_rollback,
        should_advance,
        result,
        reasons,
    }
}

impl Analysis {
    /// Whether this result warrants an advisory explanation.
    pub fn wants_advisory(&self) -> bool {
        matches!(
            self.result,
            AnalysisResult::Degraded | AnalysisResult::Unhealthy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{healthy_snapshot, test_deployment};

    #[test]
    fn healthy_snapshot_advances() {
        let deployment = test_deployment();
        let analysis = analyze(&deployment, &healthy_snapshot());

        assert!(analysis.is_healthy);
        assert!(analysis.should_advance);
        assert!(!analysis.should_rollback);
        assert_eq!(analysis.result, AnalysisResult::Healthy);
        assert!(analysis.reasons.is_empty());
        assert!(!analysis.wants_advisory());
    }

    #[test]
    fn error_rate_breach_rolls_back() {
        let mut deployment = test_deployment();
        deployment.thresholds.error_rate_threshold = 5.0;
        let snapshot = MetricsSnapshot {
            canary_error_rate: 6.0,
            ..healthy_snapshot()
        };

        let analysis = analyze(&deployment, &snapshot);
        assert!(analysis.should_rollback);
        assert!(!analysis.should_advance);
        assert_eq!(analysis.result, AnalysisResult::Unhealthy);
        assert!(analysis.reasons[0].contains("error rate"));
    }

    #[test]
    fn latency_breach_rolls_back() {
        let deployment = test_deployment();
        let snapshot = MetricsSnapshot {
            canary_avg_latency_ms: 2_000.0,
            ..healthy_snapshot()
        };

        let analysis = analyze(&deployment, &snapshot);
        assert!(analysis.should_rollback);
        assert_eq!(analysis.result, AnalysisResult::Unhealthy);
        assert!(analysis.reasons[0].contains("latency"));
    }

    #[test]
    fn pod_shortage_rolls_back() {
        let mut deployment = test_deployment();
        deployment.thresholds.min_healthy_pods = 3;
        let snapshot = MetricsSnapshot {
            canary_healthy_pods: 1,
            canary_total_pods: 3,
            ..healthy_snapshot()
        };

        let analysis = analyze(&deployment, &snapshot);
        assert!(analysis.should_rollback);
        assert!(analysis.reasons[0].contains("pods"));
    }

    #[test]
    fn reasons_accumulate_in_rule_order() {
        let mut deployment = test_deployment();
        deployment.thresholds.min_healthy_pods = 5;
        let snapshot = MetricsSnapshot {
            canary_error_rate: 20.0,
            canary_avg_latency_ms: 5_000.0,
            canary_healthy_pods: 0,
            ..healthy_snapshot()
        };

        let analysis = analyze(&deployment, &snapshot);
        assert_eq!(analysis.reasons.len(), 3);
        assert!(analysis.reasons[0].contains("error rate"));
        assert!(analysis.reasons[1].contains("latency"));
        assert!(analysis.reasons[2].contains("pods"));
    }

    #[test]
    fn breach_without_auto_rollback_is_degraded() {
        let mut deployment = test_deployment();
        deployment.rollback_policy.auto_rollback_enabled = false;
        let snapshot = MetricsSnapshot {
            canary_error_rate: 9.0,
            ..healthy_snapshot()
        };

        let analysis = analyze(&deployment, &snapshot);
        assert!(!analysis.is_healthy);
        assert!(!analysis.should_rollback);
        assert!(!analysis.should_advance);
        assert_eq!(analysis.result, AnalysisResult::Degraded);
        assert!(analysis.wants_advisory());
    }

    #[test]
    fn breach_with_rule_disabled_is_degraded() {
        let mut deployment = test_deployment();
        deployment.rollback_policy.rollback_on_latency = false;
        let snapshot = MetricsSnapshot {
            canary_avg_latency_ms: 2_000.0,
            ..healthy_snapshot()
        };

        let analysis = analyze(&deployment, &snapshot);
        assert!(!analysis.should_rollback);
        assert_eq!(analysis.result, AnalysisResult::Degraded);
    }

    #[test]
    fn within_thresholds_but_below_success_bar_is_inconclusive() {
        let mut deployment = test_deployment();
        deployment.thresholds.error_rate_threshold = 5.0;
        deployment.thresholds.success_rate_threshold = 99.0;
        let snapshot = MetricsSnapshot {
            canary_error_rate: 3.0,
            ..healthy_snapshot()
        };

        let analysis = analyze(&deployment, &snapshot);
        assert!(analysis.is_healthy);
        assert!(!analysis.should_advance);
        assert!(!analysis.should_rollback);
        assert_eq!(analysis.result, AnalysisResult::Inconclusive);
    }

    #[test]
    fn threshold_equality_is_not_a_breach() {
        let mut deployment = test_deployment();
        deployment.thresholds.error_rate_threshold = 5.0;
        deployment.thresholds.success_rate_threshold = 95.0;
        let snapshot = MetricsSnapshot {
            canary_error_rate: 5.0,
            ..healthy_snapshot()
        };

        let analysis = analyze(&deployment, &snapshot);
        assert!(analysis.is_healthy);
        assert!(analysis.should_advance);
    }

    #[test]
    fn analysis_is_deterministic() {
        let deployment = test_deployment();
        let snapshot = MetricsSnapshot {
            canary_error_rate: 7.5,
            ..healthy_snapshot()
        };
        let first = analyze(&deployment, &snapshot);
        for _ in 0..10 {
            assert_eq!(analyze(&deployment, &snapshot), first);
        }
    }
}
