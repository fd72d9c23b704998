//! Application state

use std::sync::Arc;

use planautomator_engine::{EngineResult, PlanAutomator};

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub automator: PlanAutomator,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(automator: PlanAutomator, config: Config) -> Self {
        Self {
            automator,
            config: Arc::new(config),
        }
    }

    /// Build the automator from config, loading snapshots when `DATA_DIR` is set
    pub async fn from_config(config: Config) -> EngineResult<Self> {
        let automator = PlanAutomator::from_config(&config.engine).await?;

        match automator.store().data_dir() {
            Some(dir) => tracing::info!(data_dir = %dir.display(), "Persisting owner snapshots"),
            None => tracing::warn!("DATA_DIR not set - owner state is in-memory only"),
        }
        if !automator.assistant_enabled() {
            tracing::info!("Troubleshooting assistant disabled");
        }

        Ok(Self::new(automator, config))
    }
}
