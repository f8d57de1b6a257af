//! Domain types for the canary state store.
//!
//! These types represent the persisted state of a canary rollout: the
//! deployment campaign itself, its step ladder, per-cycle analysis records,
//! and rollback records. All types are serializable to/from JSON for storage
//! in redb tables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a canary deployment.
pub type DeploymentId = String;

/// Unique identifier for a rollback record.
pub type RollbackId = String;

// ── Deployment ─────────────────────────────────────────────────────

/// One canary rollout campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    /// Target workload name.
    pub name: String,
    /// Target workload namespace.
    pub namespace: String,
    /// Version currently serving production traffic.
    pub stable_version: String,
    pub stable_image: Option<String>,
    /// Version being rolled out.
    pub canary_version: String,
    pub canary_image: Option<String>,
    pub traffic_split: TrafficSplit,
    /// Canary percent of the first step.
    pub initial_percent: u32,
    /// Canary percent of the last step.
    pub target_percent: u32,
    /// Percent added per step.
    pub increment_percent: u32,
    /// Minimum time between progression cycles.
    pub increment_interval_minutes: u32,
    pub thresholds: HealthThresholds,
    pub rollback_policy: RollbackPolicy,
    pub status: DeploymentStatus,
    /// Percent of traffic the canary is intended to receive right now.
    pub current_canary_percent: u32,
    /// Human-readable reason for the latest status change.
    pub status_message: Option<String>,
    /// Set when the deployment ends in `failed`.
    pub error_message: Option<String>,
    pub created_by: Option<String>,
    /// Unix timestamp (milliseconds) when the deployment was created.
    pub created_at: u64,
    /// Unix timestamp (milliseconds) of the last persisted change.
    pub updated_at: u64,
    pub started_at: Option<u64>,
    pub last_progress_at: Option<u64>,
    pub completed_at: Option<u64>,
}

/// How traffic is split between stable and canary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrafficSplit {
    /// Weighted random split by percentage.
    #[default]
    Percentage,
    /// Requests carrying a matching header are routed to the canary.
    Header { name: String, value: String },
    /// Requests carrying the named cookie are routed to the canary.
    Cookie { name: String },
}

/// Thresholds the canary must stay within to keep progressing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthThresholds {
    /// Maximum canary error rate, in percent.
    pub error_rate_threshold: f64,
    /// Maximum canary average latency.
    pub latency_threshold_ms: f64,
    /// Minimum success rate (100 - error rate), in percent.
    pub success_rate_threshold: f64,
    /// Minimum number of healthy canary pods.
    pub min_healthy_pods: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            error_rate_threshold: 5.0,
            latency_threshold_ms: 500.0,
            success_rate_threshold: 95.0,
            min_healthy_pods: 1,
        }
    }
}

/// Which threshold breaches trigger an automatic rollback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RollbackPolicy {
    pub auto_rollback_enabled: bool,
    pub rollback_on_error_rate: bool,
    pub rollback_on_latency: bool,
    pub rollback_on_pod_failure: bool,
    /// Hold at the final step until an operator promotes.
    pub require_manual_approval: bool,
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            auto_rollback_enabled: true,
            rollback_on_error_rate: true,
            rollback_on_latency: true,
            rollback_on_pod_failure: true,
            require_manual_approval: false,
        }
    }
}

/// Lifecycle state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Initializing,
    Progressing,
    Paused,
    /// Final step passed; waiting for an operator to promote.
    Promoting,
    Promoted,
    RollingBack,
    RolledBack,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Promoted | Self::RolledBack | Self::Failed | Self::Cancelled
        )
    }

    /// States in which exactly one step is `running`.
    pub fn has_running_step(self) -> bool {
        matches!(self, Self::Initializing | Self::Progressing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Initializing => "initializing",
            Self::Progressing => "progressing",
            Self::Paused => "paused",
            Self::Promoting => "promoting",
            Self::Promoted => "promoted",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Step ──────────────────────────────────────────────────────────

/// One rung of the rollout ladder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: String,
    pub deployment_id: DeploymentId,
    /// 1-based position in the ladder.
    pub step_number: u32,
    pub target_percent: u32,
    pub status: StepStatus,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl Step {
    /// Build a pending step for a deployment.
    pub fn pending(deployment_id: &str, step_number: u32, target_percent: u32) -> Self {
        Self {
            id: format!("{deployment_id}-step-{step_number}"),
            deployment_id: deployment_id.to_string(),
            step_number,
            target_percent,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }

    /// Build the composite key for the steps table.
    pub fn table_key(&self) -> String {
        format!("{}:{:04}", self.deployment_id, self.step_number)
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// Point-in-time health read for a canary deployment.
///
/// Rates are percentages (0–100).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricsSnapshot {
    pub canary_requests: u64,
    pub canary_errors: u64,
    pub canary_error_rate: f64,
    pub stable_requests: u64,
    pub stable_errors: u64,
    pub stable_error_rate: f64,
    pub canary_avg_latency_ms: f64,
    pub stable_avg_latency_ms: f64,
    pub canary_healthy_pods: u32,
    pub canary_total_pods: u32,
}

impl MetricsSnapshot {
    /// Canary success rate in percent.
    pub fn canary_success_rate(&self) -> f64 {
        100.0 - self.canary_error_rate
    }

    /// Reject snapshots that cannot describe a real workload.
    pub fn validate(&self) -> Result<(), String> {
        for (field, rate) in [
            ("canary_error_rate", self.canary_error_rate),
            ("stable_error_rate", self.stable_error_rate),
        ] {
            if !rate.is_finite() || !(0.0..=100.0).contains(&rate) {
                return Err(format!("{field} must be within 0..=100, got {rate}"));
            }
        }
        for (field, latency) in [
            ("canary_avg_latency_ms", self.canary_avg_latency_ms),
            ("stable_avg_latency_ms", self.stable_avg_latency_ms),
        ] {
            if !latency.is_finite() || latency < 0.0 {
                return Err(format!("{field} must be a non-negative number, got {latency}"));
            }
        }
        if self.canary_errors > self.canary_requests {
            return Err(format!(
                "canary_errors ({}) exceeds canary_requests ({})",
                self.canary_errors, self.canary_requests
            ));
        }
        if self.stable_errors > self.stable_requests {
            return Err(format!(
                "stable_errors ({}) exceeds stable_requests ({})",
                self.stable_errors, self.stable_requests
            ));
        }
        if self.canary_healthy_pods > self.canary_total_pods {
            return Err(format!(
                "canary_healthy_pods ({}) exceeds canary_total_pods ({})",
                self.canary_healthy_pods, self.canary_total_pods
            ));
        }
        Ok(())
    }
}

/// Classification of one analysis cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisResult {
    Healthy,
    Degraded,
    Unhealthy,
    Inconclusive,
}

impl AnalysisResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Inconclusive => "inconclusive",
        }
    }
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted snapshot of one analysis cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsRecord {
    pub id: String,
    pub deployment_id: DeploymentId,
    /// Step in progress when the snapshot was taken.
    pub step_id: Option<String>,
    pub step_number: Option<u32>,
    pub canary_percent: u32,
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    pub analysis_result: AnalysisResult,
    pub reasons: Vec<String>,
    /// Unix timestamp (milliseconds).
    pub recorded_at: u64,
}

// ── Rollback ──────────────────────────────────────────────────────

/// What caused a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTrigger {
    AutoErrorRate,
    AutoLatency,
    AutoPodFailure,
    AutoHealthCheck,
    Manual,
    Timeout,
    Cancelled,
}

/// Progress of a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RollbackStatus {
    /// A rollback in this state still owns the deployment.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

/// One compensating action for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackRecord {
    pub id: RollbackId,
    pub deployment_id: DeploymentId,
    pub trigger: RollbackTrigger,
    /// Canary percent at the moment the rollback was triggered.
    pub canary_percent_at_trigger: u32,
    /// Step in flight when the rollback was triggered.
    pub step_number_at_trigger: Option<u32>,
    /// Version to restore.
    pub target_version: String,
    pub target_image: Option<String>,
    pub status: RollbackStatus,
    pub initiated_by: Option<String>,
    pub reason: String,
    pub error_message: Option<String>,
    /// Unix timestamp (milliseconds).
    pub initiated_at: u64,
    pub completed_at: Option<u64>,
}
