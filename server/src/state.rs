//! Shared application state for the triage server

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use burn::prelude::Backend;
use defect_triage::utils::error::Result;
use defect_triage::{ModelSlot, RemediationBook};
use tracing::warn;

/// File locations the server reads from
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub weights: PathBuf,
    pub classes: PathBuf,
    pub procedures: PathBuf,
    pub static_dir: PathBuf,
}

pub struct AppState<B: Backend> {
    pub config: ServerConfig,
    /// Loaded on the first prediction
    pub model: ModelSlot<B>,
    /// Human-readable compute device
    pub backend: String,
    started: Instant,
}

pub type SharedState<B> = Arc<AppState<B>>;

impl<B: Backend> AppState<B> {
    pub fn new(config: ServerConfig, device: B::Device, backend: String) -> Self {
        let model = ModelSlot::new(config.weights.clone(), config.classes.clone(), device);
        Self {
            config,
            model,
            backend,
            started: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Read the procedures file fresh, so edits apply without a restart.
    ///
    /// An absent file means no checklists; a malformed one is an error.
    pub fn remediation(&self) -> Result<RemediationBook> {
        if !self.config.procedures.is_file() {
            warn!("No procedures file at {:?}", self.config.procedures);
            return Ok(RemediationBook::default());
        }
        RemediationBook::load(&self.config.procedures)
    }
}
