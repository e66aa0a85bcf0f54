//! Supervised fine-tuning loop.
//!
//! One run walks `Init -> (TrainEpoch -> EvalEpoch -> CheckpointIfBest) x N -> Done`.
//! Any error inside a batch aborts the run; there is no partial-epoch recovery.

use std::path::PathBuf;
use std::time::Instant;

use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::checkpoint::{save_checkpoint, CheckpointMetadata};
use super::config::TrainingConfig;
use super::scheduler::OneCycleLr;
use crate::dataset::{AugmentationConfig, ImageBatch, ImageFolderDataset, SplitLoader};
use crate::model::{ImageClassifier, ImageClassifierConfig};
use crate::utils::error::{Result, TriageError};
use crate::utils::logging::{EpochLine, TrainingLogger};
use crate::utils::{ensure_dir, format_duration, save_class_names, seed_everything};

/// Mean loss and mean batch accuracy over one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PassMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub batches: usize,
}

impl PassMetrics {
    fn line(&self) -> EpochLine {
        EpochLine {
            loss: self.loss,
            accuracy: self.accuracy,
        }
    }
}

#[derive(Default)]
struct PassAccumulator {
    loss_sum: f64,
    accuracy_sum: f64,
    batches: usize,
}

impl PassAccumulator {
    fn add(&mut self, loss: f64, accuracy: f64) {
        self.loss_sum += loss;
        self.accuracy_sum += accuracy;
        self.batches += 1;
    }

    /// Means over batches, with at least one in the divisor
    fn finish(&self) -> PassMetrics {
        let n = self.batches.max(1) as f64;
        PassMetrics {
            loss: self.loss_sum / n,
            accuracy: self.accuracy_sum / n,
            batches: self.batches,
        }
    }
}

/// Metrics for a single epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based
    pub epoch: usize,
    pub train: PassMetrics,
    pub val: PassMetrics,
    /// Rate used by the epoch's last optimizer step
    pub learning_rate: f64,
    pub is_best: bool,
    pub seconds: f64,
}

/// Everything a run reports, persisted as `history.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub started_at: DateTime<Local>,
    pub class_names: Vec<String>,
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    fn save(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Tracks the best validation accuracy of a run.
///
/// Only a strict improvement counts. The first observation always counts, so
/// epoch 1 is checkpointed even at zero accuracy.
#[derive(Debug, Clone, Default)]
pub struct BestTracker {
    best: Option<(usize, f64)>,
}

impl BestTracker {
    /// Record an epoch's accuracy; true when it is a new best
    pub fn observe(&mut self, epoch: usize, accuracy: f64) -> bool {
        let improved = match self.best {
            None => true,
            Some((_, best)) => accuracy > best,
        };
        if improved {
            self.best = Some((epoch, accuracy));
        }
        improved
    }

    pub fn best_accuracy(&self) -> Option<f64> {
        self.best.map(|(_, acc)| acc)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best.map(|(epoch, _)| epoch)
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub best_val_accuracy: f64,
    pub best_epoch: usize,
    pub elapsed_secs: f64,
    pub checkpoint_path: PathBuf,
    pub classes_path: PathBuf,
    pub history: TrainingHistory,
}

/// Fraction of rows whose arg-max equals the target
pub fn batch_accuracy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f64 {
    let total = targets.dims()[0];
    let correct: i64 = logits
        .argmax(1)
        .flatten::<1>(0, 1)
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as f64 / total.max(1) as f64
}

/// Train a classifier on `config.data_dir` and keep the best checkpoint.
///
/// Writes into `config.output_dir`:
/// - `classes.json` before the first epoch
/// - `best.mpk` whenever validation accuracy strictly improves
/// - `history.json` and `config.json`
pub fn train<B: AutodiffBackend>(config: &TrainingConfig, device: &B::Device) -> Result<TrainingOutcome> {
    // Init
    config.validate()?;
    let dataset = ImageFolderDataset::open(config.data_path())?;
    let class_names = dataset.class_names.clone();

    let rng = seed_everything::<B>(config.seed);

    let output_dir = PathBuf::from(&config.output_dir);
    ensure_dir(&output_dir)?;
    save_class_names(&config.classes_path(), &class_names)?;
    config
        .save(config.config_path())
        .map_err(|e| TriageError::Training(format!("failed to save config: {}", e)))?;

    let source = config.preprocess_source();
    let recipe = source.resolve(config.backbone);
    let augmentation = if source.augments_training() {
        AugmentationConfig::default()
    } else {
        AugmentationConfig::none()
    };

    let mut train_loader =
        SplitLoader::training(dataset.train, recipe.clone(), augmentation, config.batch_size, rng);
    let mut val_loader = SplitLoader::evaluation(dataset.val, recipe, config.batch_size);

    let model_config = ImageClassifierConfig::new(config.backbone, class_names.len());
    let mut model: ImageClassifier<B> =
        model_config.init_for_training(config.pretrained_path(), device)?;

    let mut optimizer = AdamWConfig::new()
        .with_weight_decay(config.weight_decay as f32)
        .with_epsilon(1e-8)
        .init::<B, ImageClassifier<B>>();

    let steps_per_epoch = train_loader.num_batches().max(1);
    let mut scheduler = OneCycleLr::new(config.learning_rate, config.epochs * steps_per_epoch);

    info!(
        "Training {} on {} classes: {} train / {} val images, {} epochs x {} steps, batch {}, max lr {}",
        config.backbone,
        class_names.len(),
        train_loader.num_samples(),
        val_loader.num_samples(),
        config.epochs,
        steps_per_epoch,
        config.batch_size,
        config.learning_rate
    );

    let started = Instant::now();
    let mut history = TrainingHistory {
        started_at: Local::now(),
        class_names: class_names.clone(),
        epochs: Vec::with_capacity(config.epochs),
    };
    let mut tracker = BestTracker::default();
    let mut logger = TrainingLogger::new(config.epochs);

    for epoch in 1..=config.epochs {
        logger.start_epoch(epoch);

        // TrainEpoch
        let (trained, train_metrics, last_lr) =
            train_epoch(model, &mut optimizer, &mut scheduler, &mut train_loader, device)?;
        model = trained;

        // EvalEpoch
        let val_metrics = evaluate(&model.valid(), &mut val_loader, device)?;

        // CheckpointIfBest
        let is_best = tracker.observe(epoch, val_metrics.accuracy);
        if is_best {
            let metadata = CheckpointMetadata::new(
                config.backbone,
                source,
                class_names.len(),
                epoch,
                val_metrics.accuracy,
            );
            save_checkpoint(&config.checkpoint_path(), &model, &metadata)?;
        }

        logger.end_epoch(train_metrics.line(), val_metrics.line(), last_lr, is_best);

        history.epochs.push(EpochMetrics {
            epoch,
            train: train_metrics,
            val: val_metrics,
            learning_rate: last_lr,
            is_best,
            seconds: logger.epoch_seconds(),
        });
        history.save(&config.history_path())?;
    }

    // Done
    let elapsed_secs = started.elapsed().as_secs_f64();
    let (best_epoch, best_val_accuracy) = tracker
        .best_epoch()
        .zip(tracker.best_accuracy())
        .ok_or_else(|| TriageError::Training("no epoch completed".to_string()))?;

    info!(
        "Done. Best val acc {:.3} at epoch {} | {}",
        best_val_accuracy,
        best_epoch,
        format_duration(elapsed_secs)
    );

    Ok(TrainingOutcome {
        best_val_accuracy,
        best_epoch,
        elapsed_secs,
        checkpoint_path: config.checkpoint_path(),
        classes_path: config.classes_path(),
        history,
    })
}

fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("  {spinner} [{bar:30}] {pos}/{len} batches {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

fn train_epoch<B, O>(
    mut model: ImageClassifier<B>,
    optimizer: &mut O,
    scheduler: &mut OneCycleLr,
    loader: &mut SplitLoader,
    device: &B::Device,
) -> Result<(ImageClassifier<B>, PassMetrics, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<ImageClassifier<B>, B>,
{
    let batcher = loader.batcher();
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let bar = progress_bar(loader.num_batches());
    let mut acc = PassAccumulator::default();
    let mut lr = scheduler.lr();

    for items in loader.epoch() {
        let batch: ImageBatch<B> = batcher.batch(items?, device);

        let logits = model.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

        let loss_value: f64 = loss.clone().into_scalar().elem();
        let accuracy = batch_accuracy(logits, batch.targets);
        acc.add(loss_value, accuracy);

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        lr = scheduler.lr();
        model = optimizer.step(lr, model, grads);
        scheduler.step();

        debug!("batch {} loss {:.4} acc {:.3} lr {:.2e}", acc.batches, loss_value, accuracy, lr);
        bar.set_message(format!("loss {:.4}", loss_value));
        bar.inc(1);
    }
    bar.finish_and_clear();

    Ok((model, acc.finish(), lr))
}

/// Forward-only pass; call with `model.valid()` so no graph is recorded
/// and batch norm uses its running statistics.
pub fn evaluate<B: Backend>(
    model: &ImageClassifier<B>,
    loader: &mut SplitLoader,
    device: &B::Device,
) -> Result<PassMetrics> {
    let batcher = loader.batcher();
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut acc = PassAccumulator::default();

    for items in loader.epoch() {
        let batch: ImageBatch<B> = batcher.batch(items?, device);
        let logits = model.forward(batch.images);
        let loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        acc.add(loss, batch_accuracy(logits, batch.targets));
    }

    Ok(acc.finish())
}
