//! Defect Triage CLI
//!
//! Train the classifier, run it on image files, or inspect a dataset.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use defect_triage::backend::{dispatch, BackendTask, ComputeDevice};
use defect_triage::dataset::dataset_stats;
use defect_triage::utils::format_duration;
use defect_triage::utils::logging::{init_logging, LogConfig};
use defect_triage::{
    train, Backbone, InferenceEngine, RemediationBook, SplitStats, TrainingConfig,
    TrainingOutcome,
};

/// Surface defect classification with Burn
#[derive(Parser, Debug)]
#[command(name = "defect_triage")]
#[command(version)]
#[command(about = "Transfer-learned defect classifier with remediation checklists", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fine-tune the classifier and keep the best checkpoint
    Train {
        /// Dataset root holding train/ and val/
        #[arg(long, default_value = "data")]
        data_dir: String,

        #[arg(long, default_value = "10")]
        epochs: usize,

        #[arg(long, default_value = "32")]
        batch_size: usize,

        /// Peak learning rate of the one-cycle schedule
        #[arg(long, default_value = "3e-4")]
        lr: f64,

        /// Square input size, used with --augment
        #[arg(long, default_value = "224")]
        image_size: u32,

        /// Output directory for the checkpoint and class list
        #[arg(long, default_value = "weights")]
        out_dir: String,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// torchvision `.pth` state dict with the backbone's ImageNet weights
        #[arg(long)]
        pretrained: Option<String>,

        /// Plain resize with random horizontal flips instead of the backbone transform
        #[arg(long, default_value = "false")]
        augment: bool,
    },

    /// Classify image files with a trained checkpoint
    Infer {
        #[arg(long, default_value = "weights/best.mpk")]
        weights: PathBuf,

        #[arg(long, default_value = "weights/classes.json")]
        classes: PathBuf,

        /// Remediation procedures to print with each prediction
        #[arg(long)]
        procedures: Option<PathBuf>,

        /// Images to classify
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Show per-class image counts
    Stats {
        #[arg(long, default_value = "data")]
        data_dir: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&LogConfig::from_verbose_flag(cli.verbose));

    match cli.command {
        Commands::Train {
            data_dir,
            epochs,
            batch_size,
            lr,
            image_size,
            out_dir,
            seed,
            pretrained,
            augment,
        } => {
            let config = TrainingConfig::new()
                .with_data_dir(data_dir)
                .with_epochs(epochs)
                .with_batch_size(batch_size)
                .with_learning_rate(lr)
                .with_image_size(image_size)
                .with_output_dir(out_dir)
                .with_seed(seed)
                .with_backbone(Backbone::default())
                .with_pretrained(pretrained)
                .with_augment(augment);

            let outcome = dispatch(TrainTask { config })?;
            print_outcome(&outcome);
        }

        Commands::Infer {
            weights,
            classes,
            procedures,
            images,
        } => {
            let book = match procedures {
                Some(path) => RemediationBook::load(&path)
                    .with_context(|| format!("loading procedures from {:?}", path))?,
                None => RemediationBook::default(),
            };
            dispatch(InferTask {
                weights,
                classes,
                book,
                images,
            })?;
        }

        Commands::Stats { data_dir } => cmd_stats(Path::new(&data_dir))?,
    }

    Ok(())
}

struct TrainTask {
    config: TrainingConfig,
}

impl BackendTask for TrainTask {
    type Output = Result<TrainingOutcome>;

    fn run<B: AutodiffBackend>(self, device: B::Device, compute: ComputeDevice) -> Self::Output {
        println!("{} {}", "Training on".cyan(), compute);
        let outcome = train::<B>(&self.config, &device).context("training failed")?;
        Ok(outcome)
    }
}

struct InferTask {
    weights: PathBuf,
    classes: PathBuf,
    book: RemediationBook,
    images: Vec<PathBuf>,
}

impl BackendTask for InferTask {
    type Output = Result<()>;

    fn run<B: AutodiffBackend>(self, device: B::Device, _compute: ComputeDevice) -> Self::Output {
        let engine = InferenceEngine::<B::InnerBackend>::load(&self.weights, &self.classes, &device)
            .with_context(|| format!("loading model from {:?}", self.weights))?;
        info!(
            "{} model trained to epoch {} (val acc {:.3})",
            engine.backbone(),
            engine.metadata().epoch,
            engine.metadata().val_accuracy
        );

        for path in &self.images {
            match engine.predict_path(path) {
                Ok(result) => {
                    println!(
                        "{} {} ({:.2}%, {:.1} ms)",
                        format!("{}:", path.display()).bold(),
                        result.label.green(),
                        result.confidence * 100.0,
                        result.inference_time_ms
                    );
                    for (i, step) in self.book.steps_for(&result.label).iter().enumerate() {
                        println!("  {}. {}", i + 1, step);
                    }
                }
                Err(e) => println!("{} {}", format!("{}:", path.display()).bold(), e.to_string().red()),
            }
        }
        Ok(())
    }
}

fn print_outcome(outcome: &TrainingOutcome) {
    println!();
    println!("{}", "Training complete".green().bold());
    println!(
        "  Best val accuracy: {:.2}% (epoch {})",
        outcome.best_val_accuracy * 100.0,
        outcome.best_epoch
    );
    println!("  Time:              {}", format_duration(outcome.elapsed_secs));
    println!("  Checkpoint:        {}", outcome.checkpoint_path.display());
    println!("  Classes:           {}", outcome.classes_path.display());
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    info!("Computing dataset statistics for: {}", data_dir.display());

    let (train, val) = dataset_stats(data_dir)
        .with_context(|| format!("reading dataset at {}", data_dir.display()))?;

    print_split("train", &train);
    print_split("val", &val);
    Ok(())
}

fn print_split(name: &str, stats: &SplitStats) {
    println!("{} ({} images)", name.cyan().bold(), stats.total_samples);
    for (class, count) in &stats.class_counts {
        println!("  {:<24} {:>6}", class, count);
    }
}
