//! Deterministic image preprocessing.
//!
//! A [`PreprocessRecipe`] turns a decoded image into a normalized CHW float
//! buffer. Recipes are never built ad hoc by training or inference code: they
//! are resolved from a [`Backbone`] and a [`PreprocessSource`], and the checkpoint
//! records both so the inference side reproduces exactly what training used.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};

use super::backbone::Backbone;

/// ImageNet normalization mean (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet normalization std (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How the input is scaled before cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resize {
    /// Scale so the shorter side equals the value, keeping aspect ratio
    ShorterSide(u32),
    /// Scale to a square of the given side, ignoring aspect ratio
    Exact(u32),
}

/// A fully resolved preprocessing pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessRecipe {
    pub resize: Resize,
    pub center_crop: Option<u32>,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

/// Which recipe a training run used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreprocessSource {
    /// The transform the backbone weights were trained with
    Backbone,
    /// Exact resize to `image_size` and [0, 1] scaling only; training adds random flips
    Plain { image_size: u32 },
}

impl PreprocessSource {
    pub fn resolve(&self, backbone: Backbone) -> PreprocessRecipe {
        match *self {
            PreprocessSource::Backbone => backbone.transforms(),
            PreprocessSource::Plain { image_size } => PreprocessRecipe::plain(image_size),
        }
    }

    /// Whether the training split should be augmented under this source
    pub fn augments_training(&self) -> bool {
        matches!(self, PreprocessSource::Plain { .. })
    }
}

impl PreprocessRecipe {
    pub fn plain(image_size: u32) -> Self {
        Self {
            resize: Resize::Exact(image_size),
            center_crop: None,
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }

    /// Side length of the square tensor this recipe produces
    pub fn output_size(&self) -> usize {
        match (self.center_crop, self.resize) {
            (Some(crop), _) => crop as usize,
            (None, Resize::Exact(side)) => side as usize,
            // Not square; rejected by `validate`
            (None, Resize::ShorterSide(side)) => side as usize,
        }
    }

    /// Reject recipes that cannot produce a fixed-shape tensor
    pub fn validate(&self) -> Result<(), String> {
        match (self.resize, self.center_crop) {
            (Resize::Exact(0), _) | (Resize::ShorterSide(0), _) => {
                Err("resize target must be positive".to_string())
            }
            (_, Some(0)) => Err("crop size must be positive".to_string()),
            (Resize::ShorterSide(_), None) => {
                Err("shorter-side resize needs a center crop for a fixed shape".to_string())
            }
            (Resize::ShorterSide(side), Some(crop)) | (Resize::Exact(side), Some(crop))
                if crop > side =>
            {
                Err(format!("crop {} exceeds resize target {}", crop, side))
            }
            _ if self.std.iter().any(|s| *s <= 0.0) => {
                Err("normalization std must be positive".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Resize and crop to the recipe's geometry, as 8-bit RGB
    pub fn prepare(&self, image: &DynamicImage) -> RgbImage {
        let rgb = image.to_rgb8();
        let resized = match self.resize {
            Resize::Exact(side) => imageops::resize(&rgb, side, side, FilterType::Triangle),
            Resize::ShorterSide(side) => {
                let (w, h) = rgb.dimensions();
                let (nw, nh) = shorter_side_dims(w, h, side);
                imageops::resize(&rgb, nw, nh, FilterType::Triangle)
            }
        };

        match self.center_crop {
            Some(crop) => {
                let (w, h) = resized.dimensions();
                let crop_w = crop.min(w);
                let crop_h = crop.min(h);
                let left = (w - crop_w) / 2;
                let top = (h - crop_h) / 2;
                let cropped = imageops::crop_imm(&resized, left, top, crop_w, crop_h).to_image();
                if cropped.dimensions() == (crop, crop) {
                    cropped
                } else {
                    imageops::resize(&cropped, crop, crop, FilterType::Triangle)
                }
            }
            None => resized,
        }
    }

    /// Scale to [0, 1], normalize per channel and lay out as CHW
    pub fn to_chw(&self, image: &RgbImage) -> Vec<f32> {
        let (width, height) = image.dimensions();
        let plane = (width * height) as usize;
        let mut data = vec![0.0f32; 3 * plane];

        for (x, y, pixel) in image.enumerate_pixels() {
            let offset = (y * width + x) as usize;
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                data[c * plane + offset] = (value - self.mean[c]) / self.std[c];
            }
        }

        data
    }

    /// `prepare` followed by `to_chw`
    pub fn apply(&self, image: &DynamicImage) -> Vec<f32> {
        self.to_chw(&self.prepare(image))
    }
}

/// The long side is truncated, as torchvision's `Resize(int)` does
fn shorter_side_dims(width: u32, height: u32, target: u32) -> (u32, u32) {
    let scale = |long: u32, short: u32| {
        let scaled = u64::from(long) * u64::from(target) / u64::from(short.max(1));
        u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
    };
    if width <= height {
        (target, scale(height, width))
    } else {
        (scale(width, height), target)
    }
}
