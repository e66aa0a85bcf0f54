//! Burn batching for image folder splits
//!
//! [`SplitLoader`] turns an [`ImageFolderSplit`] into a finite sequence of
//! batches, one epoch at a time. Images are decoded lazily per batch, so a
//! corrupt file surfaces as an error from the batch that contains it.

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::ImageReader;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::augmentation::{AugmentOps, AugmentationConfig};
use super::loader::{ImageFolderSplit, Sample};
use crate::model::PreprocessRecipe;
use crate::utils::error::{Result, TriageError};

/// A preprocessed image ready for batching
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Normalized CHW data, `3 * size * size` values
    pub image: Vec<f32>,
    /// Class label
    pub label: usize,
}

/// A batch of images and their labels
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Shape `[batch, 3, size, size]`
    pub images: Tensor<B, 4>,
    /// Shape `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks [`ImageItem`]s of one recipe's output size
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let mut images = Vec::with_capacity(batch_size * 3 * self.image_size * self.image_size);
        let mut targets = Vec::with_capacity(batch_size);

        for item in items {
            images.extend_from_slice(&item.image);
            targets.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images, [batch_size, 3, self.image_size, self.image_size]),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [batch_size]), device);

        ImageBatch { images, targets }
    }
}

/// Decode an image file and apply the recipe plus any augmentation
pub fn load_item(
    sample: &Sample,
    recipe: &PreprocessRecipe,
    ops: AugmentOps,
) -> Result<ImageItem> {
    let image = decode_file(&sample.path)?;
    let prepared = ops.apply(recipe.prepare(&image));
    Ok(ImageItem {
        image: recipe.to_chw(&prepared),
        label: sample.label,
    })
}

fn decode_file(path: &Path) -> Result<image::DynamicImage> {
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| TriageError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| TriageError::ImageLoad(path.to_path_buf(), e.to_string()))
}

/// Samples of a split, exposed through Burn's dataset interface
impl Dataset<Sample> for ImageFolderSplit {
    fn get(&self, index: usize) -> Option<Sample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Restartable batch source for one split
pub struct SplitLoader {
    split: ImageFolderSplit,
    recipe: PreprocessRecipe,
    augmentation: AugmentationConfig,
    batch_size: usize,
    /// Present for shuffled splits; drives order and augmentation
    rng: Option<ChaCha8Rng>,
}

impl SplitLoader {
    /// Shuffled every epoch, augmented as configured
    pub fn training(
        split: ImageFolderSplit,
        recipe: PreprocessRecipe,
        augmentation: AugmentationConfig,
        batch_size: usize,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            split,
            recipe,
            augmentation,
            batch_size: batch_size.max(1),
            rng: Some(rng),
        }
    }

    /// Stable order, never augmented
    pub fn evaluation(split: ImageFolderSplit, recipe: PreprocessRecipe, batch_size: usize) -> Self {
        Self {
            split,
            recipe,
            augmentation: AugmentationConfig::none(),
            batch_size: batch_size.max(1),
            rng: None,
        }
    }

    pub fn num_samples(&self) -> usize {
        self.split.len()
    }

    /// Batches per epoch; the last one may be short
    pub fn num_batches(&self) -> usize {
        self.split.len().div_ceil(self.batch_size)
    }

    pub fn image_size(&self) -> usize {
        self.recipe.output_size()
    }

    pub fn batcher(&self) -> ImageBatcher {
        ImageBatcher::new(self.image_size())
    }

    /// Start a new pass over the split.
    ///
    /// Order and augmentation for the whole epoch are fixed here.
    pub fn epoch(&mut self) -> EpochBatches<'_> {
        let mut order: Vec<usize> = (0..self.split.len()).collect();
        let mut ops = vec![AugmentOps::default(); order.len()];

        if let Some(rng) = self.rng.as_mut() {
            order.shuffle(rng);
            for op in ops.iter_mut() {
                *op = self.augmentation.sample(rng);
            }
        }

        let plan: Vec<(usize, AugmentOps)> = order.into_iter().zip(ops).collect();
        EpochBatches {
            loader: self,
            plan,
            cursor: 0,
        }
    }
}

/// One epoch's batches, decoded on demand
pub struct EpochBatches<'a> {
    loader: &'a SplitLoader,
    plan: Vec<(usize, AugmentOps)>,
    cursor: usize,
}

impl Iterator for EpochBatches<'_> {
    type Item = Result<Vec<ImageItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.plan.len() {
            return None;
        }
        let end = (self.cursor + self.loader.batch_size).min(self.plan.len());
        let chunk = &self.plan[self.cursor..end];
        self.cursor = end;

        let loader = self.loader;
        Some(
            chunk
                .par_iter()
                .map(|&(index, ops)| {
                    let sample = loader.split.get(index).ok_or_else(|| {
                        TriageError::Training(format!("sample index {} out of range", index))
                    })?;
                    load_item(&sample, &loader.recipe, ops)
                })
                .collect(),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.plan.len() - self.cursor).div_ceil(self.loader.batch_size);
        (remaining, Some(remaining))
    }
}
