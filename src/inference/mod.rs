//! Inference
//!
//! - [`engine`]: strict checkpoint load and single-image prediction
//! - [`handle`]: lazy, shareable engine slot for long-running services

pub mod engine;
pub mod handle;

pub use engine::{InferenceEngine, PredictionResult};
pub use handle::ModelSlot;
