//! Image folder discovery
//!
//! Expects the layout:
//! ```text
//! root/
//!   train/<class>/<image files>
//!   val/<class>/<image files>
//! ```
//! Class names are the sorted subdirectory names of `train/`; label `i` is the
//! `i`-th name. `val/` must contain exactly the same class folders.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{Result, TriageError};

/// File extensions recognized as images (lowercase)
pub const IMAGE_EXTENSIONS: [&str; 9] =
    ["jpg", "jpeg", "png", "ppm", "bmp", "pgm", "tif", "tiff", "webp"];

pub const TRAIN_DIR: &str = "train";
pub const VAL_DIR: &str = "val";

/// One image on disk and its label index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

/// All samples of one split, in stable (class, then path) order
#[derive(Debug, Clone)]
pub struct ImageFolderSplit {
    pub root: PathBuf,
    pub class_names: Vec<String>,
    pub samples: Vec<Sample>,
}

/// Train and validation splits sharing one class list
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    pub class_names: Vec<String>,
    pub train: ImageFolderSplit,
    pub val: ImageFolderSplit,
}

/// Per-class image counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitStats {
    pub total_samples: usize,
    pub class_counts: Vec<(String, usize)>,
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Sorted names of the immediate subdirectories of `dir`
pub fn discover_classes(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(TriageError::Configuration(format!(
            "directory not found: {:?}",
            dir
        )));
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().is_dir() {
            let name = entry.file_name().into_string().map_err(|name| {
                TriageError::Configuration(format!("class folder name is not UTF-8: {:?}", name))
            })?;
            names.push(name);
        }
    }
    names.sort();

    if names.is_empty() {
        return Err(TriageError::Configuration(format!(
            "no class folders found in {:?}",
            dir
        )));
    }

    Ok(names)
}

impl ImageFolderSplit {
    /// Scan `root` using a fixed class list; every class must have a folder with images
    pub fn open(root: &Path, class_names: &[String]) -> Result<Self> {
        let mut samples = Vec::new();

        for (label, class_name) in class_names.iter().enumerate() {
            let class_dir = root.join(class_name);
            if !class_dir.is_dir() {
                return Err(TriageError::Configuration(format!(
                    "class folder missing: {:?}",
                    class_dir
                )));
            }

            let before = samples.len();
            for entry in WalkDir::new(&class_dir)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
            {
                let entry = entry.map_err(|e| {
                    TriageError::Configuration(format!("cannot read {:?}: {}", class_dir, e))
                })?;
                if entry.file_type().is_file() && is_image_file(entry.path()) {
                    samples.push(Sample {
                        path: entry.into_path(),
                        label,
                    });
                }
            }

            let found = samples.len() - before;
            if found == 0 {
                return Err(TriageError::Configuration(format!(
                    "class folder {:?} contains no images",
                    class_dir
                )));
            }
            debug!("{:?}: {} images for class '{}'", root, found, class_name);
        }

        Ok(Self {
            root: root.to_path_buf(),
            class_names: class_names.to_vec(),
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stats(&self) -> SplitStats {
        let mut counts = vec![0usize; self.class_names.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        SplitStats {
            total_samples: self.samples.len(),
            class_counts: self.class_names.iter().cloned().zip(counts).collect(),
        }
    }
}

impl ImageFolderDataset {
    /// Scan `root/train` and `root/val`.
    ///
    /// Fails before any image is decoded if a directory is missing, a class
    /// folder is empty, no classes exist, or the two splits disagree on classes.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(TriageError::Configuration(format!(
                "data directory not found: {:?}",
                root
            )));
        }

        let train_dir = root.join(TRAIN_DIR);
        let val_dir = root.join(VAL_DIR);
        let class_names = discover_classes(&train_dir)?;
        let val_classes = discover_classes(&val_dir)?;

        if class_names != val_classes {
            let train_set: BTreeSet<_> = class_names.iter().collect();
            let val_set: BTreeSet<_> = val_classes.iter().collect();
            let only_train: Vec<_> = train_set.difference(&val_set).collect();
            let only_val: Vec<_> = val_set.difference(&train_set).collect();
            return Err(TriageError::Configuration(format!(
                "train and val class folders differ (only in train: {:?}, only in val: {:?})",
                only_train, only_val
            )));
        }

        let train = ImageFolderSplit::open(&train_dir, &class_names)?;
        let val = ImageFolderSplit::open(&val_dir, &class_names)?;

        info!(
            "Found {} classes: {} training and {} validation images",
            class_names.len(),
            train.len(),
            val.len()
        );

        Ok(Self {
            class_names,
            train,
            val,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::tempdir;

    /// Write a solid-color PNG
    pub(crate) fn write_png(path: &Path, size: u32, color: [u8; 3]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(size, size, Rgb(color)).save(path).unwrap();
    }

    /// `root/{train,val}/<class>/img_<n>.png` with `per_class` images each
    pub(crate) fn build_tree(root: &Path, classes: &[&str], per_class: usize) {
        for split in [TRAIN_DIR, VAL_DIR] {
            for (c, class) in classes.iter().enumerate() {
                for n in 0..per_class {
                    let shade = (c * 80 + n * 5) as u8;
                    write_png(
                        &root.join(split).join(class).join(format!("img_{}.png", n)),
                        12,
                        [shade, 255 - shade, 40],
                    );
                }
            }
        }
    }

    #[test]
    fn test_sorted_classes_and_labels() {
        let dir = tempdir().unwrap();
        build_tree(dir.path(), &["scratch", "crack", "rust"], 2);

        let dataset = ImageFolderDataset::open(dir.path()).unwrap();
        assert_eq!(dataset.class_names, vec!["crack", "rust", "scratch"]);
        assert_eq!(dataset.train.len(), 6);
        assert_eq!(dataset.val.len(), 6);

        let first = &dataset.train.samples[0];
        assert!(first.path.ends_with("crack/img_0.png"));
        assert_eq!(first.label, 0);
        assert_eq!(dataset.train.samples[5].label, 2);
    }

    #[test]
    fn test_non_images_ignored_and_nested_found() {
        let dir = tempdir().unwrap();
        build_tree(dir.path(), &["crack"], 1);
        fs::write(dir.path().join("train/crack/notes.txt"), "x").unwrap();
        write_png(&dir.path().join("train/crack/sub/deep.PNG"), 8, [0, 0, 0]);

        let dataset = ImageFolderDataset::open(dir.path()).unwrap();
        assert_eq!(dataset.train.len(), 2);
        assert_eq!(dataset.num_classes(), 1);
    }

    #[test]
    fn test_missing_val_dir() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("train/crack/a.png"), 8, [0, 0, 0]);
        let err = ImageFolderDataset::open(dir.path()).unwrap_err();
        assert!(matches!(err, TriageError::Configuration(_)));
    }

    #[test]
    fn test_empty_class_folder() {
        let dir = tempdir().unwrap();
        build_tree(dir.path(), &["crack", "rust"], 1);
        fs::create_dir_all(dir.path().join("train/scratch")).unwrap();
        fs::create_dir_all(dir.path().join("val/scratch")).unwrap();

        let err = ImageFolderDataset::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no images"));
    }

    #[test]
    fn test_zero_classes() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("train")).unwrap();
        fs::create_dir_all(dir.path().join("val")).unwrap();
        let err = ImageFolderDataset::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no class folders"));
    }

    #[test]
    fn test_split_class_disagreement() {
        let dir = tempdir().unwrap();
        build_tree(dir.path(), &["crack", "rust"], 1);
        write_png(&dir.path().join("val/scratch/a.png"), 8, [0, 0, 0]);

        let err = ImageFolderDataset::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("scratch"));
    }

    #[test]
    fn test_stats() {
        let dir = tempdir().unwrap();
        build_tree(dir.path(), &["crack", "rust"], 3);
        let dataset = ImageFolderDataset::open(dir.path()).unwrap();
        let stats = dataset.train.stats();
        assert_eq!(stats.total_samples, 6);
        assert_eq!(stats.class_counts[1], ("rust".to_string(), 3));
    }
}
