//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use beacon_engine::Engine;
use beacon_storage::{ExecutionRepository, RuleRepository};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub rules: Arc<RuleRepository>,
    pub executions: Arc<ExecutionRepository>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        engine: Arc<Engine>,
        rules: Arc<RuleRepository>,
        executions: Arc<ExecutionRepository>,
    ) -> Self {
        Self {
            engine,
            rules,
            executions,
            start_time: Instant::now(),
        }
    }
}
