//! Dataset loading
//!
//! - [`loader`]: scans `train/` and `val/` class folders
//! - [`burn_dataset`]: lazy decoding, batching and per-epoch shuffling
//! - [`augmentation`]: random horizontal flip for the plain pipeline

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;

pub use augmentation::{AugmentOps, AugmentationConfig};
pub use burn_dataset::{ImageBatch, ImageBatcher, ImageItem, SplitLoader};
pub use loader::{ImageFolderDataset, ImageFolderSplit, Sample, SplitStats};

use std::path::Path;

use crate::utils::error::Result;

/// Per-split class counts, for reporting before a run
pub fn dataset_stats(root: &Path) -> Result<(SplitStats, SplitStats)> {
    let dataset = ImageFolderDataset::open(root)?;
    Ok((dataset.train.stats(), dataset.val.stats()))
}
