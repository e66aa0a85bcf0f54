//! Fine-tuning: configuration, schedule, checkpoints and the epoch loop.

pub mod checkpoint;
pub mod config;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{
    checkpoint_file, load_checkpoint, save_checkpoint, CheckpointMetadata, LoadedCheckpoint,
};
pub use config::{TrainingConfig, CHECKPOINT_FILE, CLASSES_FILE, CONFIG_FILE, HISTORY_FILE};
pub use scheduler::OneCycleLr;
pub use trainer::{
    batch_accuracy, evaluate, train, BestTracker, EpochMetrics, PassMetrics, TrainingHistory,
    TrainingOutcome,
};
