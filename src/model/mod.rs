//! Model builder
//!
//! The classifier is a ResNet-18 backbone whose 1000-way ImageNet head is
//! replaced by a head sized to the dataset's class count. Construction is a
//! pure function of [`ImageClassifierConfig`]: the same config always yields
//! the same parameter layout, so saved weights line up with a rebuilt shell.

pub mod backbone;
pub mod preprocess;
pub mod resnet;

use std::path::Path;

use burn::module::{Module, ModuleVisitor, ParamId};
use burn::prelude::*;
use tracing::{info, warn};

pub use backbone::Backbone;
pub use preprocess::{PreprocessRecipe, PreprocessSource, Resize, IMAGENET_MEAN, IMAGENET_STD};
pub use resnet::{ResNet, ResNetRecord};

use crate::utils::error::TriageError;

/// The network trained and served by this crate
pub type ImageClassifier<B> = ResNet<B>;

/// Configuration for the image classifier
#[derive(Config, Debug)]
pub struct ImageClassifierConfig {
    /// Backbone variant, which also fixes the preprocessing recipe
    pub backbone: Backbone,

    /// Number of output classes
    pub num_classes: usize,
}

impl ImageClassifierConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_classes == 0 {
            return Err(TriageError::Configuration(
                "num_classes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Architecture with freshly initialized weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<ImageClassifier<B>> {
        self.validate()?;
        Ok(ResNet::new(self.backbone, self.num_classes, device))
    }

    /// Published backbone weights with a new head for `num_classes`
    pub fn init_pretrained<B: Backend>(
        &self,
        weights: &Path,
        device: &B::Device,
    ) -> crate::Result<ImageClassifier<B>> {
        self.validate()?;
        let network = self.backbone.load_pretrained::<B>(weights, device)?;
        Ok(network.with_head(self.num_classes, device))
    }

    /// Pretrained when a weights file is given, random otherwise
    pub fn init_for_training<B: Backend>(
        &self,
        weights: Option<&Path>,
        device: &B::Device,
    ) -> crate::Result<ImageClassifier<B>> {
        match weights {
            Some(path) => {
                let model = self.init_pretrained(path, device)?;
                info!(
                    "Transfer learning from {} with a {}-class head",
                    self.backbone, self.num_classes
                );
                Ok(model)
            }
            None => {
                warn!(
                    "No pretrained weights given; training {} from random initialization",
                    self.backbone
                );
                self.init(device)
            }
        }
    }
}

/// Load `record` into `shell`, rejecting records that do not fit its layout
pub fn load_strict<B: Backend>(
    shell: ImageClassifier<B>,
    record: ResNetRecord<B>,
    what: &str,
) -> crate::Result<ImageClassifier<B>> {
    resnet::check_record_layout(&record)
        .map_err(|reason| TriageError::ArchitectureMismatch(format!("{}: {}", what, reason)))?;
    ensure_same_shapes(&shell, shell.clone().load_record(record), what)
}

/// Collects parameter shapes in declaration order
#[derive(Default)]
struct ParamShapes {
    shapes: Vec<Vec<usize>>,
}

impl<B: Backend> ModuleVisitor<B> for ParamShapes {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.shapes.push(tensor.dims().to_vec());
    }
}

/// Parameter shapes of `module`, in declaration order
pub fn param_shapes<B: Backend, M: Module<B>>(module: &M) -> Vec<Vec<usize>> {
    let mut visitor = ParamShapes::default();
    module.visit(&mut visitor);
    visitor.shapes
}

/// Check that `loaded` has exactly the parameter layout of `expected`.
///
/// Loading a record never reshapes tensors, so a record for a different head
/// width or stage layout would otherwise slip through unnoticed.
pub fn ensure_same_shapes<B: Backend, M: Module<B>>(
    expected: &M,
    loaded: M,
    what: &str,
) -> crate::Result<M> {
    let want = param_shapes(expected);
    let got = param_shapes(&loaded);

    if want.len() != got.len() {
        return Err(TriageError::ArchitectureMismatch(format!(
            "{} has {} parameter tensors, architecture expects {}",
            what,
            got.len(),
            want.len()
        )));
    }

    if let Some((index, (w, g))) = want
        .iter()
        .zip(got.iter())
        .enumerate()
        .find(|(_, (w, g))| w != g)
    {
        return Err(TriageError::ArchitectureMismatch(format!(
            "{} parameter #{} has shape {:?}, architecture expects {:?}",
            what, index, g, w
        )));
    }

    Ok(loaded)
}
