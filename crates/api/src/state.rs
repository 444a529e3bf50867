use std::sync::Arc;

use replay_pipeline::PipelineOrchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Upload pipeline, including the session store it writes to.
    pub pipeline: Arc<PipelineOrchestrator>,
}
