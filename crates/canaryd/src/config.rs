//! canaryd.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub metrics: MetricsConfig,
    pub advisory: AdvisoryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8480 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/canaryd"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between progression ticks.
    pub tick_secs: u64,
    pub advisory_timeout_ms: u64,
    /// Restore stable traffic for automatic rollbacks in the same tick.
    pub auto_execute_rollbacks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            advisory_timeout_ms: 3_000,
            auto_execute_rollbacks: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsProviderKind {
    #[default]
    Synthetic,
    Static,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub provider: MetricsProviderKind,
    /// Baseline canary error rate in percent.
    pub error_rate: f64,
    pub latency_ms: f64,
    pub canary_pods: u32,
    /// Fixed seed for reproducible synthetic runs.
    pub seed: Option<u64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            provider: MetricsProviderKind::Synthetic,
            error_rate: 0.5,
            latency_ms: 80.0,
            canary_pods: 3,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    #[default]
    None,
    Template,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    pub kind: AdvisoryKind,
    /// `host:port` of the advisory service when `kind = "http"`.
    pub endpoint: Option<String>,
    pub path: String,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            kind: AdvisoryKind::None,
            endpoint: None,
            path: "/explain".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Emit JSON log lines instead of the human format.
    pub json: bool,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine.tick_secs == 0 {
            anyhow::bail!("engine.tick_secs must be greater than zero");
        }
        if !self.metrics.error_rate.is_finite() || !(0.0..=100.0).contains(&self.metrics.error_rate)
        {
            anyhow::bail!("metrics.error_rate must be within 0..=100");
        }
        if self.advisory.kind == AdvisoryKind::Http && self.advisory.endpoint.is_none() {
            anyhow::bail!("advisory.endpoint is required when advisory.kind = \"http\"");
        }
        Ok(())
    }
}
