//! Best-model checkpoint: weights, class count and metadata in one record file.
//!
//! Loading is all-or-nothing. A checkpoint is rejected unless:
//! - the record deserializes with every expected key present
//! - its class count equals the class list's length
//! - its backbone identifier is known and its recorded preprocessing recipe
//!   equals the one derived from that identifier today
//! - every parameter tensor has the shape the rebuilt architecture expects

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{
    load_strict, Backbone, ImageClassifier, ImageClassifierConfig, PreprocessRecipe,
    PreprocessSource, ResNetRecord,
};
use crate::utils::error::{Result, TriageError};

/// Full precision so a reloaded model reproduces the saved one exactly
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// The recorder replaces whatever extension it is given with this one
pub const CHECKPOINT_EXTENSION: &str = "mpk";

/// The file actually read or written for a checkpoint `path`
pub fn checkpoint_file(path: &Path) -> PathBuf {
    path.with_extension(CHECKPOINT_EXTENSION)
}

/// Provenance stored next to the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Stable backbone identifier, see [`Backbone::id`]
    pub backbone: String,
    pub preprocess: PreprocessSource,
    /// Recipe resolved at training time
    pub recipe: PreprocessRecipe,
    pub num_classes: usize,
    /// 1-based epoch at which these weights became the best
    pub epoch: usize,
    pub val_accuracy: f64,
    pub crate_version: String,
}

impl CheckpointMetadata {
    pub fn new(
        backbone: Backbone,
        preprocess: PreprocessSource,
        num_classes: usize,
        epoch: usize,
        val_accuracy: f64,
    ) -> Self {
        Self {
            backbone: backbone.id().to_string(),
            preprocess,
            recipe: preprocess.resolve(backbone),
            num_classes,
            epoch,
            val_accuracy,
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Resolve the backbone and check the recipe still matches it
    pub fn resolve(&self) -> Result<(Backbone, PreprocessRecipe)> {
        let backbone = Backbone::from_id(&self.backbone).ok_or_else(|| {
            TriageError::ArchitectureMismatch(format!("unknown backbone '{}'", self.backbone))
        })?;

        let recipe = self.preprocess.resolve(backbone);
        if recipe != self.recipe {
            return Err(TriageError::ArchitectureMismatch(format!(
                "preprocessing for {} is now {:?} but the checkpoint was trained with {:?}",
                backbone, recipe, self.recipe
            )));
        }
        Ok((backbone, recipe))
    }
}

/// On-disk layout of a checkpoint
#[derive(Record)]
pub struct CheckpointRecord<B: Backend> {
    pub model: ResNetRecord<B>,
    pub num_classes: usize,
    /// JSON-encoded [`CheckpointMetadata`]
    pub metadata: String,
}

/// A validated checkpoint, ready for inference
#[derive(Debug)]
pub struct LoadedCheckpoint<B: Backend> {
    pub model: ImageClassifier<B>,
    pub metadata: CheckpointMetadata,
    pub backbone: Backbone,
    pub recipe: PreprocessRecipe,
}

/// Write `model` and its metadata to `path`, replacing any previous file
pub fn save_checkpoint<B: Backend>(
    path: &Path,
    model: &ImageClassifier<B>,
    metadata: &CheckpointMetadata,
) -> Result<()> {
    if model.num_classes() != metadata.num_classes {
        return Err(TriageError::Training(format!(
            "model head has {} outputs but metadata says {}",
            model.num_classes(),
            metadata.num_classes
        )));
    }
    let file = checkpoint_file(path);
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let record = CheckpointRecord {
        model: model.clone().into_record(),
        num_classes: metadata.num_classes,
        metadata: serde_json::to_string(metadata)?,
    };

    CheckpointRecorder::new()
        .record(record, file.clone())
        .map_err(|e| TriageError::Training(format!("failed to save checkpoint {:?}: {}", file, e)))?;

    debug!("Checkpoint written to {:?}", file);
    Ok(())
}

/// Load and validate a checkpoint for a class list of `expected_classes` names
pub fn load_checkpoint<B: Backend>(
    path: &Path,
    expected_classes: usize,
    device: &B::Device,
) -> Result<LoadedCheckpoint<B>> {
    let file = checkpoint_file(path);
    if !file.is_file() {
        return Err(TriageError::ModelUnavailable(format!(
            "checkpoint not found at {:?}",
            file
        )));
    }

    let record: CheckpointRecord<B> = CheckpointRecorder::new()
        .load(file.clone(), device)
        .map_err(|e| {
            TriageError::ArchitectureMismatch(format!(
                "checkpoint {:?} does not match the classifier layout: {}",
                file, e
            ))
        })?;

    let metadata: CheckpointMetadata = serde_json::from_str(&record.metadata).map_err(|e| {
        TriageError::ArchitectureMismatch(format!("checkpoint metadata is unreadable: {}", e))
    })?;

    if record.num_classes != expected_classes {
        return Err(TriageError::ArchitectureMismatch(format!(
            "checkpoint has {} classes but the class list has {}",
            record.num_classes, expected_classes
        )));
    }
    if metadata.num_classes != record.num_classes {
        return Err(TriageError::ArchitectureMismatch(format!(
            "checkpoint metadata says {} classes, record says {}",
            metadata.num_classes, record.num_classes
        )));
    }

    let (backbone, recipe) = metadata.resolve()?;

    let shell = ImageClassifierConfig::new(backbone, record.num_classes).init::<B>(device)?;
    let model = load_strict(shell, record.model, "checkpoint")?;

    info!(
        "Loaded checkpoint {:?} ({}, {} classes, epoch {}, val acc {:.3})",
        file, backbone, metadata.num_classes, metadata.epoch, metadata.val_accuracy
    );

    Ok(LoadedCheckpoint {
        model,
        metadata,
        backbone,
        recipe,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::model::param_shapes;
    use tempfile::tempdir;

    type TestBackend = CpuBackend;

    fn classifier(num_classes: usize) -> ImageClassifier<TestBackend> {
        ImageClassifierConfig::new(Backbone::default(), num_classes)
            .init(&Default::default())
            .unwrap()
    }

    fn metadata(num_classes: usize) -> CheckpointMetadata {
        CheckpointMetadata::new(
            Backbone::default(),
            PreprocessSource::Plain { image_size: 32 },
            num_classes,
            1,
            0.5,
        )
    }

    fn logits_for_zeros(model: &ImageClassifier<TestBackend>) -> Vec<f32> {
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &Default::default());
        model.forward(input).into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("best.mpk");
        let model = classifier(3);

        save_checkpoint(&path, &model, &metadata(3)).unwrap();
        assert!(path.is_file());

        let loaded = load_checkpoint::<TestBackend>(&path, 3, &Default::default()).unwrap();
        assert_eq!(loaded.metadata, metadata(3));
        assert_eq!(loaded.backbone, Backbone::default());
        assert_eq!(loaded.recipe, PreprocessRecipe::plain(32));
        assert_eq!(param_shapes(&loaded.model), param_shapes(&model));

        let before = logits_for_zeros(&model);
        let after = logits_for_zeros(&loaded.model);
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let err = load_checkpoint::<TestBackend>(&dir.path().join("best.mpk"), 3, &Default::default())
            .unwrap_err();
        assert!(matches!(err, TriageError::ModelUnavailable(_)));
    }

    #[test]
    fn test_class_count_disagreement() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("best.mpk");
        save_checkpoint(&path, &classifier(3), &metadata(3)).unwrap();

        let err = load_checkpoint::<TestBackend>(&path, 4, &Default::default()).unwrap_err();
        assert!(matches!(err, TriageError::ArchitectureMismatch(_)));
    }

    #[test]
    fn test_head_shape_disagreement() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("best.mpk");

        // Record claims 3 classes but carries a 5-wide head
        let record = CheckpointRecord::<TestBackend> {
            model: classifier(5).into_record(),
            num_classes: 3,
            metadata: serde_json::to_string(&metadata(3)).unwrap(),
        };
        CheckpointRecorder::new().record(record, path.clone()).unwrap();

        let err = load_checkpoint::<TestBackend>(&path, 3, &Default::default()).unwrap_err();
        assert!(matches!(err, TriageError::ArchitectureMismatch(_)));
    }

    #[test]
    fn test_missing_stage_block_is_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("best.mpk");

        let mut model = classifier(3).into_record();
        model.layer1.truncate(1);
        let record = CheckpointRecord::<TestBackend> {
            model,
            num_classes: 3,
            metadata: serde_json::to_string(&metadata(3)).unwrap(),
        };
        CheckpointRecorder::new().record(record, path.clone()).unwrap();

        let err = load_checkpoint::<TestBackend>(&path, 3, &Default::default()).unwrap_err();
        assert!(matches!(err, TriageError::ArchitectureMismatch(_)));
    }

    #[test]
    fn test_path_resolves_to_mpk_file() {
        let dir = tempdir().unwrap();
        save_checkpoint(&dir.path().join("best"), &classifier(2), &metadata(2)).unwrap();
        assert!(dir.path().join("best.mpk").is_file());

        for given in ["best", "best.mpk", "best.pt"] {
            let loaded = load_checkpoint::<TestBackend>(&dir.path().join(given), 2, &Default::default());
            assert!(loaded.is_ok(), "{}", given);
        }

        // A file under another extension is never what the recorder reads
        std::fs::write(dir.path().join("other.pt"), b"weights").unwrap();
        let err = load_checkpoint::<TestBackend>(&dir.path().join("other.pt"), 2, &Default::default())
            .unwrap_err();
        assert!(matches!(err, TriageError::ModelUnavailable(_)));
    }

    #[test]
    fn test_unknown_backbone_and_stale_recipe() {
        let mut meta = metadata(2);
        meta.backbone = "vgg11.imagenet1k_v1".into();
        assert!(matches!(meta.resolve(), Err(TriageError::ArchitectureMismatch(_))));

        let mut meta = metadata(2);
        meta.recipe.mean = [0.5; 3];
        assert!(matches!(meta.resolve(), Err(TriageError::ArchitectureMismatch(_))));

        assert!(metadata(2).resolve().is_ok());
    }

    #[test]
    fn test_garbage_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("best.mpk");
        std::fs::write(&path, b"definitely not messagepack").unwrap();

        let err = load_checkpoint::<TestBackend>(&path, 3, &Default::default()).unwrap_err();
        assert!(matches!(err, TriageError::ArchitectureMismatch(_)));
    }

    #[test]
    fn test_save_rejects_inconsistent_metadata() {
        let dir = tempdir().unwrap();
        let err = save_checkpoint(&dir.path().join("best.mpk"), &classifier(3), &metadata(4))
            .unwrap_err();
        assert!(matches!(err, TriageError::Training(_)));
    }
}
