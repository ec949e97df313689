use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::JobRunner;
use crate::store::JobStore;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// In-memory job records.
    pub store: Arc<JobStore>,
    /// Background executor for submitted jobs.
    pub runner: Arc<JobRunner>,
}

impl AppState {
    /// Build state around a fresh store and runner.
    pub fn new(config: ServerConfig) -> Result<Self, reqwest::Error> {
        let store = Arc::new(JobStore::new());
        let runner = Arc::new(JobRunner::new(&config, Arc::clone(&store))?);
        Ok(Self {
            config: Arc::new(config),
            store,
            runner,
        })
    }
}
