//! # Defect Triage
//!
//! Surface defect classification by transfer learning, built on the Burn framework.
//!
//! A ResNet-18 backbone is fine-tuned on an image folder dataset (`train/` and
//! `val/`, one subfolder per class). The best epoch is kept as a checkpoint and
//! served one image at a time, together with a remediation checklist for the
//! predicted label.
//!
//! ## Modules
//!
//! - `dataset`: class folder discovery, preprocessing and batching
//! - `model`: ResNet-18, backbone weights and the bound preprocessing recipe
//! - `training`: one-cycle AdamW fine-tuning with best-checkpoint selection
//! - `inference`: strict checkpoint loading and single-image prediction
//! - `remediation`: label to checklist lookup
//! - `utils`: errors, logging and filesystem helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use defect_triage::backend::CpuTrainingBackend;
//! use defect_triage::training::{train, TrainingConfig};
//!
//! let config = TrainingConfig::new().with_data_dir("data".into()).with_epochs(5);
//! let outcome = train::<CpuTrainingBackend>(&config, &Default::default())?;
//! println!("best val acc {:.3}", outcome.best_val_accuracy);
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod remediation;
pub mod training;
pub mod utils;

pub use dataset::{ImageFolderDataset, SplitStats};
pub use inference::{InferenceEngine, ModelSlot, PredictionResult};
pub use model::{Backbone, ImageClassifier, ImageClassifierConfig};
pub use remediation::RemediationBook;
pub use training::{train, TrainingConfig, TrainingOutcome};
pub use utils::error::{Result, TriageError};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
