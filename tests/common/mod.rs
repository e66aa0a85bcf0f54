//! Synthetic image folder datasets for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use defect_triage::backend::CpuTrainingBackend;
use defect_triage::{train, TrainingConfig, TrainingOutcome};
use image::{Rgb, RgbImage};

pub const CLASSES: [&str; 2] = ["crack", "rust"];

/// A flat colour per class with a little per-image variation
fn class_color(class: usize, index: usize) -> [u8; 3] {
    let shade = (index * 12) as u8;
    match class {
        0 => [200 - shade, 200 - shade, 210 - shade],
        _ => [150 + shade, 60, 20 + shade],
    }
}

pub fn write_png(path: &Path, color: [u8; 3]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_pixel(40, 40, Rgb(color)).save(path).unwrap();
}

/// `root/{train,val}/<class>/img_<i>.png`
pub fn build_dataset(root: &Path, per_class: usize) {
    for split in ["train", "val"] {
        for (c, class) in CLASSES.iter().enumerate() {
            for i in 0..per_class {
                let path = root.join(split).join(class).join(format!("img_{}.png", i));
                write_png(&path, class_color(c, i));
            }
        }
    }
}

/// Small plain-pipeline run that finishes in seconds on the CPU
pub fn quick_config(data_dir: &Path, output_dir: &Path, seed: u64) -> TrainingConfig {
    TrainingConfig::new()
        .with_data_dir(data_dir.to_string_lossy().into_owned())
        .with_output_dir(output_dir.to_string_lossy().into_owned())
        .with_epochs(2)
        .with_batch_size(4)
        .with_learning_rate(1e-3)
        .with_image_size(32)
        .with_augment(true)
        .with_seed(seed)
}

pub fn run(config: &TrainingConfig) -> TrainingOutcome {
    train::<CpuTrainingBackend>(config, &Default::default()).unwrap()
}

pub fn sample_image(root: &Path) -> PathBuf {
    root.join("val").join(CLASSES[1]).join("img_0.png")
}
