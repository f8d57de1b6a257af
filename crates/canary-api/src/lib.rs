//! canary-api — REST API for canary rollouts.
//!
//! Provides axum route handlers over a [`CanaryEngine`].
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/deployments` | List deployments |
//! | POST | `/api/v1/deployments` | Create a deployment and its step ladder |
//! | GET | `/api/v1/deployments/{id}` | Deployment with steps |
//! | DELETE | `/api/v1/deployments/{id}` | Delete a finished or pending deployment |
//! | GET | `/api/v1/deployments/{id}/steps` | Step ladder |
//! | GET | `/api/v1/deployments/{id}/metrics?limit=N` | Latest analysis records |
//! | GET | `/api/v1/deployments/{id}/rollbacks` | Rollback history |
//! | POST | `/api/v1/deployments/{id}/start` | Start or restart |
//! | POST | `/api/v1/deployments/{id}/progress` | Run one analysis cycle |
//! | POST | `/api/v1/deployments/{id}/promote` | Promote to target |
//! | POST | `/api/v1/deployments/{id}/pause` | Pause |
//! | POST | `/api/v1/deployments/{id}/resume` | Resume |
//! | POST | `/api/v1/deployments/{id}/cancel` | Cancel |
//! | POST | `/api/v1/deployments/{id}/rollback` | Initiate a manual rollback |
//! | GET | `/api/v1/rollbacks/{id}` | Rollback record |
//! | POST | `/api/v1/rollbacks/{id}/complete` | Record a rollback outcome |
//! | POST | `/api/v1/rollbacks/{id}/execute` | Restore stable and complete |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use canary_rollout::CanaryEngine;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: CanaryEngine,
}

/// Build the API router.
pub fn build_router(engine: CanaryEngine) -> Router {
    let api_routes = Router::new()
        .route(
            "/deployments",
            get(handlers::list_deployments).post(handlers::create_deployment),
        )
        .route(
            "/deployments/{id}",
            get(handlers::get_deployment).delete(handlers::delete_deployment),
        )
        .route("/deployments/{id}/steps", get(handlers::list_steps))
        .route("/deployments/{id}/metrics", get(handlers::list_metrics))
        .route("/deployments/{id}/rollbacks", get(handlers::list_rollbacks))
        .route("/deployments/{id}/start", post(handlers::start_deployment))
        .route("/deployments/{id}/progress", post(handlers::progress_deployment))
        .route("/deployments/{id}/promote", post(handlers::promote_deployment))
        .route("/deployments/{id}/pause", post(handlers::pause_deployment))
        .route("/deployments/{id}/resume", post(handlers::resume_deployment))
        .route("/deployments/{id}/cancel", post(handlers::cancel_deployment))
        .route("/deployments/{id}/rollback", post(handlers::initiate_rollback))
        .route("/rollbacks/{id}", get(handlers::get_rollback))
        .route("/rollbacks/{id}/complete", post(handlers::complete_rollback))
        .route("/rollbacks/{id}/execute", post(handlers::execute_rollback))
        .with_state(ApiState { engine });

    Router::new().nest("/api/v1", api_routes)
}
