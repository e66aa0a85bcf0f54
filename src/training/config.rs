//! Training run configuration.

use std::path::{Path, PathBuf};

use burn::config::Config;

use crate::model::{Backbone, PreprocessSource};
use crate::utils::error::TriageError;

/// File name of the best checkpoint inside the output directory
pub const CHECKPOINT_FILE: &str = "best.mpk";

/// File name of the class list inside the output directory
pub const CLASSES_FILE: &str = "classes.json";

/// Per-epoch metrics of the last run
pub const HISTORY_FILE: &str = "history.json";

/// The configuration the run was started with
pub const CONFIG_FILE: &str = "config.json";

/// Hyperparameters and paths for one training run
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Root holding `train/` and `val/`
    #[config(default = "String::from(\"data\")")]
    pub data_dir: String,

    #[config(default = "10")]
    pub epochs: usize,

    #[config(default = "32")]
    pub batch_size: usize,

    /// Peak rate of the one-cycle schedule
    #[config(default = "3e-4")]
    pub learning_rate: f64,

    /// AdamW decoupled weight decay
    #[config(default = "0.01")]
    pub weight_decay: f64,

    /// Square input side for the plain pipeline
    #[config(default = "224")]
    pub image_size: u32,

    /// Where the checkpoint, class list and history are written
    #[config(default = "String::from(\"weights\")")]
    pub output_dir: String,

    #[config(default = "42")]
    pub seed: u64,

    #[config(default = "Backbone::ResNet18ImageNet1kV1")]
    pub backbone: Backbone,

    /// torchvision `.pth` state dict with the backbone's published weights
    pub pretrained: Option<String>,

    /// Use the plain pipeline with random flips instead of the backbone transform
    #[config(default = "false")]
    pub augment: bool,
}

impl TrainingConfig {
    /// Reject values that would make the run meaningless
    pub fn validate(&self) -> crate::Result<()> {
        if self.epochs == 0 {
            return Err(TriageError::Configuration("epochs must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(TriageError::Configuration("batch size must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TriageError::Configuration(format!(
                "learning rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(TriageError::Configuration(format!(
                "weight decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        self.preprocess_source()
            .resolve(self.backbone)
            .validate()
            .map_err(TriageError::Configuration)
    }

    pub fn preprocess_source(&self) -> PreprocessSource {
        if self.augment {
            PreprocessSource::Plain {
                image_size: self.image_size,
            }
        } else {
            PreprocessSource::Backbone
        }
    }

    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }

    pub fn pretrained_path(&self) -> Option<&Path> {
        self.pretrained.as_deref().map(Path::new)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        Path::new(&self.output_dir).join(CHECKPOINT_FILE)
    }

    pub fn classes_path(&self) -> PathBuf {
        Path::new(&self.output_dir).join(CLASSES_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        Path::new(&self.output_dir).join(HISTORY_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        Path::new(&self.output_dir).join(CONFIG_FILE)
    }
}
