//! Process-wide settings and shared resources, built once at startup

use crate::config::Config;
use crate::errors::AppResult;
use crate::worker::{AuxiliaryHttp, ScriptLibrary, WorkerSettings};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub library: Arc<ScriptLibrary>,
    pub worker_settings: Arc<WorkerSettings>,
    pub auxiliary: AuxiliaryHttp,
}

impl AppContext {
    /// Load the script library from disk and build the shared HTTP client
    pub fn initialize(config: Config) -> AppResult<Self> {
        let library = ScriptLibrary::load(
            config.jobs.controller_script.as_deref(),
            &config.jobs.library_directory,
        )?;
        Self::with_library(config, library)
    }

    pub fn with_library(config: Config, library: ScriptLibrary) -> AppResult<Self> {
        let auxiliary = AuxiliaryHttp::new(config.engine.request_timeout, &config.worker.user_agent)?;
        Ok(Self {
            worker_settings: Arc::new(WorkerSettings::from_config(&config)),
            library: Arc::new(library),
            config: Arc::new(config),
            auxiliary,
        })
    }
}
