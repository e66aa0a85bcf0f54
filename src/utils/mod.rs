//! Utilities: error types, logging, seeding and small filesystem helpers.

pub mod error;
pub mod fs;
pub mod logging;

use burn::tensor::backend::Backend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub use error::{Result, TriageError};
pub use fs::{ensure_dir, load_class_names, save_class_names};
pub use logging::{init_logging, LogConfig};

/// Seed the backend's weight-init generator and return the data-order RNG.
///
/// Every other source of randomness in a run (shuffling, augmentation) must be
/// drawn from the returned generator.
pub fn seed_everything<B: Backend>(seed: u64) -> ChaCha8Rng {
    B::seed(seed);
    ChaCha8Rng::seed_from_u64(seed)
}

/// Wall time as `42.0s`, `3m 05s` or `2h 10m`
pub fn format_duration(seconds: f64) -> String {
    let whole = seconds.max(0.0) as u64;
    match whole {
        0..=59 => format!("{:.1}s", seconds.max(0.0)),
        60..=3599 => format!("{}m {:02}s", whole / 60, whole % 60),
        _ => format!("{}h {:02}m", whole / 3600, (whole % 3600) / 60),
    }
}
