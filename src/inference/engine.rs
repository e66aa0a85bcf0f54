//! Single-image prediction with a loaded checkpoint.

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use burn::prelude::*;
use burn::tensor::activation::softmax;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Backbone, ImageClassifier, PreprocessRecipe};
use crate::training::checkpoint::{checkpoint_file, load_checkpoint, CheckpointMetadata};
use crate::utils::error::{Result, TriageError};
use crate::utils::fs::load_class_names;

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Predicted class name
    pub label: String,

    /// Probability of the predicted class
    pub confidence: f32,

    /// Index of the predicted class in the class list
    pub class_index: usize,

    /// Softmax over all classes, in class-list order
    pub probabilities: Vec<f32>,

    pub inference_time_ms: f64,
}

impl PredictionResult {
    fn from_probabilities(probabilities: Vec<f32>, class_names: &[String], started: Instant) -> Result<Self> {
        let class_index = top_index(&probabilities)
            .ok_or_else(|| TriageError::Inference("model produced no outputs".to_string()))?;
        let label = class_names.get(class_index).cloned().ok_or_else(|| {
            TriageError::Inference(format!(
                "class index {} outside a list of {} names",
                class_index,
                class_names.len()
            ))
        })?;

        Ok(Self {
            label,
            confidence: probabilities[class_index],
            class_index,
            probabilities,
            inference_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

/// Arg-max; ties go to the lowest index
fn top_index(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// A trained classifier bound to its class list and preprocessing.
///
/// Read-only after construction. The model sits behind a mutex, so one
/// forward pass runs at a time.
pub struct InferenceEngine<B: Backend> {
    model: Mutex<ImageClassifier<B>>,
    recipe: PreprocessRecipe,
    backbone: Backbone,
    class_names: Vec<String>,
    metadata: CheckpointMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// Load the class list and checkpoint.
    ///
    /// Either file missing gives [`TriageError::ModelUnavailable`]; a
    /// checkpoint that disagrees with the class list or the architecture gives
    /// [`TriageError::ArchitectureMismatch`].
    pub fn load(weights_path: &Path, classes_path: &Path, device: &B::Device) -> Result<Self> {
        let file = checkpoint_file(weights_path);
        if !file.is_file() {
            return Err(TriageError::ModelUnavailable(format!(
                "checkpoint not found at {:?}",
                file
            )));
        }
        let class_names = load_class_names(classes_path)?;
        let checkpoint = load_checkpoint::<B>(weights_path, class_names.len(), device)?;

        Ok(Self {
            model: Mutex::new(checkpoint.model),
            recipe: checkpoint.recipe,
            backbone: checkpoint.backbone,
            class_names,
            metadata: checkpoint.metadata,
            device: device.clone(),
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn recipe(&self) -> &PreprocessRecipe {
        &self.recipe
    }

    pub fn backbone(&self) -> Backbone {
        self.backbone
    }

    pub fn metadata(&self) -> &CheckpointMetadata {
        &self.metadata
    }

    /// Classify an encoded image (PNG, JPEG, ...)
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<PredictionResult> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| TriageError::InvalidImage(e.to_string()))?;
        self.predict_image(&image)
    }

    /// Classify an image file
    pub fn predict_path(&self, path: &Path) -> Result<PredictionResult> {
        let bytes = std::fs::read(path)?;
        self.predict_bytes(&bytes).map_err(|e| match e {
            TriageError::InvalidImage(msg) => {
                TriageError::InvalidImage(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Classify an already decoded image
    pub fn predict_image(&self, image: &DynamicImage) -> Result<PredictionResult> {
        let started = Instant::now();
        let size = self.recipe.output_size();
        let pixels = self.recipe.apply(&DynamicImage::ImageRgb8(image.to_rgb8()));
        let input = Tensor::<B, 4>::from_floats(TensorData::new(pixels, [1, 3, size, size]), &self.device);

        let logits = {
            let model = self
                .model
                .lock()
                .map_err(|_| TriageError::Inference("model lock poisoned".to_string()))?;
            model.forward(input)
        };

        let probabilities = softmax(logits, 1)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| TriageError::Inference(format!("{:?}", e)))?;

        let result = PredictionResult::from_probabilities(probabilities, &self.class_names, started)?;
        debug!(
            "Predicted {} ({:.3}) in {:.1} ms",
            result.label, result.confidence, result.inference_time_ms
        );
        Ok(result)
    }
}
