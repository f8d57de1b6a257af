//! Advisory text — human-readable explanations for degraded canaries.
//!
//! Advisory output annotates an analysis; it never feeds back into a
//! rollout decision. Callers invoke it after the decision is persisted and
//! outside the deployment lock, bounded by a timeout, and only log failures.

use std::time::Duration;

use bytes::Bytes;
use canary_state::{Deployment, MetricsSnapshot};
use http_body_util::{BodyExt, Full};
use serde_json::json;
use tracing::{debug, warn};

use crate::BoxFuture;

/// Produces an explanation for a degraded or unhealthy analysis.
pub trait AdvisoryTextGenerator: Send + Sync {
    fn explain<'a>(
        &'a self,
        deployment: &'a Deployment,
        metrics: &'a MetricsSnapshot,
        reasons: &'a [String],
    ) -> BoxFuture<'a, Result<String, String>>;
}

/// Request advisory text with a deadline. Never fails the caller.
pub(crate) async fn explain_best_effort(
    generator: &dyn AdvisoryTextGenerator,
    deployment: &Deployment,
    metrics: &MetricsSnapshot,
    reasons: &[String],
    timeout: Duration,
) -> Option<String> {
    match tokio::time::timeout(timeout, generator.explain(deployment, metrics, reasons)).await {
        Ok(Ok(text)) => Some(text),
        Ok(Err(e)) => {
            warn!(deployment = %deployment.id, error = %e, "advisory generation failed");
            None
        }
        Err(_) => {
            warn!(
                deployment = %deployment.id,
                timeout_ms = timeout.as_millis() as u64,
                "advisory generation timed out"
            );
            None
        }
    }
}

/// Builds a deterministic summary locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateAdvisory;

impl AdvisoryTextGenerator for TemplateAdvisory {
    fn explain<'a>(
        &'a self,
        deployment: &'a Deployment,
        metrics: &'a MetricsSnapshot,
        reasons: &'a [String],
    ) -> BoxFuture<'a, Result<String, String>> {
        let findings = if reasons.is_empty() {
            "no threshold breached".to_string()
        } else {
            reasons.join("; ")
        };
        let text = format!(
            "Canary {} of {}/{} at {}% traffic: {}. Error rate {:.2}% (stable {:.2}%), \
             latency {:.0}ms (stable {:.0}ms), {}/{} canary pods healthy.",
            deployment.canary_version,
            deployment.namespace,
            deployment.name,
            deployment.current_canary_percent,
            findings,
            metrics.canary_error_rate,
            metrics.stable_error_rate,
            metrics.canary_avg_latency_ms,
            metrics.stable_avg_latency_ms,
            metrics.canary_healthy_pods,
            metrics.canary_total_pods,
        );
        Box::pin(async move { Ok(text) })
    }
}

/// POSTs the analysis as JSON to an HTTP endpoint and returns the body.
///
/// The endpoint may answer with plain text or `{"explanation": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpAdvisory {
    /// `host:port` of the advisory service.
    address: String,
    path: String,
}

impl HttpAdvisory {
    pub fn new(address: &str, path: &str) -> Self {
        Self {
            address: address.to_string(),
            path: path.to_string(),
        }
    }

    async fn post(&self, body: Vec<u8>) -> Result<String, String> {
        let uri = format!("http://{}{}", self.address, self.path);

        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| format!("connect to {} failed: {e}", self.address))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| format!("handshake failed: {e}"))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", &self.address)
            .header("content-type", "application/json")
            .header("user-agent", "canary-rollout/0.1")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| e.to_string())?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("advisory endpoint returned {}", resp.status()));
        }

        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| format!("reading body failed: {e}"))?
            .to_bytes();
        let text = String::from_utf8_lossy(&bytes).trim().to_string();
        debug!(%uri, len = text.len(), "advisory text received");

        let explanation = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("explanation")?.as_str().map(str::to_string));
        Ok(explanation.unwrap_or(text))
    }
}

impl AdvisoryTextGenerator for HttpAdvisory {
    fn explain<'a>(
        &'a self,
        deployment: &'a Deployment,
        metrics: &'a MetricsSnapshot,
        reasons: &'a [String],
    ) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            let payload = json!({
                "deployment_id": deployment.id,
                "workload": format!("{}/{}", deployment.namespace, deployment.name),
                "stable_version": deployment.stable_version,
                "canary_version": deployment.canary_version,
                "canary_percent": deployment.current_canary_percent,
                "metrics": metrics,
                "reasons": reasons,
            });
            let body = serde_json::to_vec(&payload).map_err(|e| e.to_string())?;
            self.post(body).await
        })
    }
}
