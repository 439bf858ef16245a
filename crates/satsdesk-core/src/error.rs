//! Error types shared by the cache and the router.

use thiserror::Error;

/// Errors surfaced by [`Router`](crate::router::Router) operations.
///
/// Every variant is returned as a failed `Result`; nothing here is ever
/// raised as a panic across the router boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    #[error("router is not initialized (state: {0})")]
    NotInitialized(String),

    #[error("'{name}' failed: {message}")]
    ExecutionFailed { name: String, message: String },

    /// Rejected at `initialize`; the router stays in its previous state.
    #[error("invalid router configuration: {0}")]
    InvalidConfig(String),
}

/// Errors surfaced by [`Cache`](crate::cache::Cache) writes.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The size estimator could not measure the value; nothing was stored.
    #[error("could not estimate size of '{key}': {source}")]
    SizeEstimation {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}
