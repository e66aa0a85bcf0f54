//! Backbone identity and pretrained weight import.

use std::path::Path;

use burn::record::{FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::preprocess::{PreprocessRecipe, Resize, IMAGENET_MEAN, IMAGENET_STD};
use super::resnet::{ResNet, ResNetRecord};
use crate::utils::error::{Result, TriageError};

/// Pretrained backbone variants.
///
/// The identifier is what checkpoints record; the preprocessing recipe and
/// feature width are derived from it and nowhere else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backbone {
    /// torchvision `ResNet18_Weights.IMAGENET1K_V1`
    #[default]
    #[serde(rename = "resnet18.imagenet1k_v1")]
    ResNet18ImageNet1kV1,
}

impl Backbone {
    pub const ALL: [Backbone; 1] = [Backbone::ResNet18ImageNet1kV1];

    pub fn id(&self) -> &'static str {
        match self {
            Backbone::ResNet18ImageNet1kV1 => "resnet18.imagenet1k_v1",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.id() == id)
    }

    /// Width of the pooled feature vector fed to the classification head
    pub fn feature_dim(&self) -> usize {
        match self {
            Backbone::ResNet18ImageNet1kV1 => 512,
        }
    }

    /// Head width of the published weights
    pub fn pretrained_classes(&self) -> usize {
        match self {
            Backbone::ResNet18ImageNet1kV1 => 1000,
        }
    }

    /// The evaluation transform the published weights were trained with
    pub fn transforms(&self) -> PreprocessRecipe {
        match self {
            Backbone::ResNet18ImageNet1kV1 => PreprocessRecipe {
                resize: Resize::ShorterSide(256),
                center_crop: Some(224),
                mean: IMAGENET_MEAN,
                std: IMAGENET_STD,
            },
        }
    }

    /// Load published weights from torchvision's `.pth` state dict into a
    /// network with the original 1000-class head.
    pub fn load_pretrained<B: Backend>(&self, path: &Path, device: &B::Device) -> Result<ResNet<B>> {
        if !path.is_file() {
            return Err(TriageError::Configuration(format!(
                "pretrained weights not found at {:?}",
                path
            )));
        }

        let args = LoadArgs::new(path.to_path_buf())
            .with_key_remap(
                r"(layer[1-4])\.([0-9]+)\.downsample\.0\.(.+)",
                "$1.$2.downsample.conv.$3",
            )
            .with_key_remap(
                r"(layer[1-4])\.([0-9]+)\.downsample\.1\.(.+)",
                "$1.$2.downsample.bn.$3",
            );

        let record: ResNetRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(args, device)
            .map_err(|e| {
                TriageError::ArchitectureMismatch(format!(
                    "pretrained weights {:?} do not fit {}: {}",
                    path,
                    self.id(),
                    e
                ))
            })?;

        let network = ResNet::<B>::new(*self, self.pretrained_classes(), device);
        super::load_strict(network, record, "pretrained weights")
            .map(|loaded| {
                info!("Loaded {} weights from {:?}", self.id(), path);
                loaded
            })
    }
}

impl std::fmt::Display for Backbone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}
