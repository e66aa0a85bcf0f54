//! Training-time augmentation
//!
//! Random decisions are drawn up front, one [`AugmentOps`] per sample in batch
//! order, and applied later when the image is decoded. Decoding can then run in
//! parallel without changing what the seeded generator produces.
//!
//! - **Training with the plain pipeline**: random horizontal flip
//! - **Training with a backbone transform**, **validation**, **inference**: nothing

use image::imageops;
use image::RgbImage;
use rand::Rng;

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentationConfig {
    /// Probability of applying horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations (for validation/inference)
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.horizontal_flip_prob > 0.0
    }

    /// Draw the operations for one sample.
    ///
    /// Consumes nothing from `rng` when augmentation is disabled.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> AugmentOps {
        if !self.is_enabled() {
            return AugmentOps::default();
        }
        AugmentOps {
            horizontal_flip: rng.gen_bool(self.horizontal_flip_prob.min(1.0)),
        }
    }
}

/// Concrete operations chosen for one sample
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AugmentOps {
    pub horizontal_flip: bool,
}

impl AugmentOps {
    pub fn apply(&self, image: RgbImage) -> RgbImage {
        if self.horizontal_flip {
            imageops::flip_horizontal(&image)
        } else {
            image
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn two_tone() -> RgbImage {
        RgbImage::from_fn(4, 2, |x, _| if x < 2 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) })
    }

    #[test]
    fn test_flip_mirrors_columns() {
        let flipped = AugmentOps { horizontal_flip: true }.apply(two_tone());
        assert_eq!(flipped.get_pixel(0, 0), &Rgb([0, 0, 255]));
        assert_eq!(flipped.get_pixel(3, 1), &Rgb([255, 0, 0]));

        let untouched = AugmentOps::default().apply(two_tone());
        assert_eq!(untouched, two_tone());
    }

    #[test]
    fn test_disabled_draws_nothing() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut reference = ChaCha8Rng::seed_from_u64(1);

        for _ in 0..10 {
            assert_eq!(AugmentationConfig::none().sample(&mut rng), AugmentOps::default());
        }
        assert_eq!(rng.gen::<u64>(), reference.gen::<u64>());
    }

    #[test]
    fn test_flip_rate_and_determinism() {
        let config = AugmentationConfig::default();
        let draw = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..1000).map(|_| config.sample(&mut rng)).collect::<Vec<_>>()
        };

        let a = draw(42);
        assert_eq!(a, draw(42));

        let flips = a.iter().filter(|op| op.horizontal_flip).count();
        assert!((400..600).contains(&flips), "flips = {}", flips);
    }
}
