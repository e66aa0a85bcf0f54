//! Logging Module
//!
//! Structured logging through the `tracing` crate.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default maximum level; `RUST_LOG` overrides it when set
    pub level: Level,
    /// Show module paths
    pub include_target: bool,
    pub include_thread_ids: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug level with module paths and thread ids, for `--verbose`
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_target: true,
            include_thread_ids: true,
            ..Self::default()
        }
    }

    pub fn from_verbose_flag(verbose: bool) -> Self {
        if verbose {
            Self::verbose()
        } else {
            Self::default()
        }
    }

    /// `RUST_LOG` if present and valid, else this config's level
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()))
    }
}

/// Install the global subscriber.
///
/// Fails if one was already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Per-epoch progress lines for a training run
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// `epoch` is 1-based
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::debug!("Epoch {}/{} started", epoch, self.total_epochs);
    }

    /// Seconds since the current epoch started
    pub fn epoch_seconds(&self) -> f64 {
        self.epoch_start.elapsed().as_secs_f64()
    }

    /// Estimated seconds left, from the mean epoch time so far
    pub fn eta_seconds(&self) -> f64 {
        let done = self.epoch.max(1) as f64;
        let remaining = self.total_epochs.saturating_sub(self.epoch) as f64;
        self.training_start.elapsed().as_secs_f64() / done * remaining
    }

    pub fn end_epoch(&self, train: EpochLine, val: EpochLine, learning_rate: f64, is_best: bool) {
        tracing::info!(
            "Epoch {:03} | train_loss {:.4} acc {:.3} | val_loss {:.4} acc {:.3} | lr {:.2e}{}",
            self.epoch,
            train.loss,
            train.accuracy,
            val.loss,
            val.accuracy,
            learning_rate,
            if is_best { " | best" } else { "" }
        );
        tracing::debug!(
            "Epoch {}/{} took {:.1}s, ETA {:.0}s",
            self.epoch,
            self.total_epochs,
            self.epoch_seconds(),
            self.eta_seconds()
        );
    }
}

/// Loss and accuracy pair reported by [`TrainingLogger::end_epoch`]
#[derive(Debug, Clone, Copy)]
pub struct EpochLine {
    pub loss: f64,
    pub accuracy: f64,
}
