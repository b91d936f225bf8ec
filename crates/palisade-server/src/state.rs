//! Application state for the API server.

use std::sync::Arc;

use palisade_core::pipeline::AnalysisPipeline;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The analysis pipeline, holding the rate gate and cache singletons.
    pub pipeline: Arc<AnalysisPipeline>,
}

impl AppState {
    /// Creates application state around an existing pipeline.
    pub fn new(pipeline: Arc<AnalysisPipeline>) -> Self {
        Self { pipeline }
    }
}
