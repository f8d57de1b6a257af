//! Error types for the rollout engine.

use canary_state::StateError;
use thiserror::Error;

/// Result type alias for rollout operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Errors returned by rollout operations.
///
/// Every error leaves the deployment and its steps exactly as they were
/// before the call.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// Rejected at creation; never clamped.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The requested transition is not valid from the current state.
    #[error("state conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(#[from] StateError),

    #[error("traffic controller failed: {0}")]
    Traffic(String),
}
