//! Standalone regression tests.
//!
//! Assembles the daemon from a config file on a temporary data directory
//! and drives rollouts through the API and the progression loop.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use canary_api::build_router;
use canary_rollout::ProgressionLoop;
use canary_state::DeploymentStatus;
use canaryd::{DaemonConfig, build_engine, open_store};
use serde_json::{Value, json};
use tower::ServiceExt;

fn static_config(error_rate: f64) -> DaemonConfig {
    DaemonConfig::from_toml(&format!(
        r#"
        [metrics]
        provider = "static"
        error_rate = {error_rate}

        [advisory]
        kind = "template"
        "#
    ))
    .unwrap()
}

async fn send(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    let resp = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn deployment_body() -> Value {
    json!({
        "name": "payments",
        "namespace": "prod",
        "stable_version": "v7",
        "stable_image": "registry/payments:v7",
        "canary_version": "v8",
        "canary_image": "registry/payments:v8",
        "initial_percent": 25,
        "increment_percent": 25,
        "increment_interval_minutes": 0
    })
}

#[tokio::test]
async fn standalone_rollout_promotes_via_loop() {
    let dir = tempfile::tempdir().unwrap();
    let config = static_config(0.5);
    let store = Arc::new(open_store(dir.path()).unwrap());
    let engine = build_engine(&config, store).unwrap();
    let router = build_router(engine.clone());

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/deployments",
        Some(deployment_body()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["steps"].as_array().unwrap().len(), 4);
    let id = body["data"]["deployment"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&router, "POST", &format!("/api/v1/deployments/{id}/start"), None).await;
    assert_eq!(status, StatusCode::OK);

    let progression = ProgressionLoop::new(engine.clone());
    for _ in 0..4 {
        progression.tick().await;
    }

    let (_, body) = send(&router, "GET", &format!("/api/v1/deployments/{id}"), None).await;
    assert_eq!(body["data"]["deployment"]["status"], "promoted");
    assert_eq!(body["data"]["deployment"]["current_canary_percent"], 100);
    let (_, body) = send(&router, "GET", &format!("/api/v1/deployments/{id}/metrics"), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn standalone_unhealthy_canary_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let config = static_config(12.0);
    let store = Arc::new(open_store(dir.path()).unwrap());
    let engine = build_engine(&config, store).unwrap();
    let router = build_router(engine.clone());

    let (_, body) = send(&router, "POST", "/api/v1/deployments", Some(deployment_body())).await;
    let id = body["data"]["deployment"]["id"].as_str().unwrap().to_string();
    send(&router, "POST", &format!("/api/v1/deployments/{id}/start"), None).await;

    let summary = ProgressionLoop::new(engine.clone()).tick().await;
    assert_eq!(summary.rollbacks_executed, 1);
    assert!(summary.reports[0].advisory.as_deref().unwrap().contains("v8"));

    let (_, body) = send(
        &router,
        "GET",
        &format!("/api/v1/deployments/{id}/rollbacks"),
        None,
    )
    .await;
    let rollbacks = body["data"].as_array().unwrap();
    assert_eq!(rollbacks.len(), 1);
    assert_eq!(rollbacks[0]["trigger"], "auto_health_check");
    assert_eq!(rollbacks[0]["status"], "completed");
    assert_eq!(rollbacks[0]["canary_percent_at_trigger"], 25);
    assert_eq!(rollbacks[0]["target_version"], "v7");

    let view = engine.get(&id).unwrap();
    assert_eq!(view.deployment.status, DeploymentStatus::RolledBack);
    assert_eq!(view.deployment.current_canary_percent, 0);
}

#[tokio::test]
async fn standalone_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = static_config(0.5);

    let id = {
        let store = Arc::new(open_store(dir.path()).unwrap());
        let engine = build_engine(&config, store).unwrap();
        let id = engine
            .progression()
            .create(serde_json::from_value(deployment_body()).unwrap())
            .unwrap()
            .deployment
            .id;
        engine.progression().start(&id).await.unwrap();
        engine.progression().progress(&id).await.unwrap();
        id
    };

    let store = Arc::new(open_store(dir.path()).unwrap());
    let engine = build_engine(&config, store).unwrap();
    let view = engine.get(&id).unwrap();
    assert_eq!(view.deployment.status, DeploymentStatus::Progressing);
    assert_eq!(view.deployment.current_canary_percent, 50);
    assert_eq!(engine.metrics(&id, 10).unwrap().len(), 1);

    let report = engine.progression().progress(&id).await.unwrap();
    assert_eq!(report.deployment_id, id);
    assert_eq!(engine.get(&id).unwrap().deployment.current_canary_percent, 75);
}

#[tokio::test]
async fn standalone_api_list_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(dir.path()).unwrap());
    let engine = build_engine(&DaemonConfig::default(), store).unwrap();
    let (status, body) = send(&build_router(engine), "GET", "/api/v1/deployments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}
