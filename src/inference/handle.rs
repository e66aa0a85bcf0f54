//! Lazily loaded, shareable inference engine.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use burn::prelude::*;
use tracing::{info, warn};

use super::engine::InferenceEngine;
use crate::utils::error::Result;

/// Holds at most one [`InferenceEngine`], built on first use.
///
/// The slot is either uninitialized or ready. Initialization runs under the
/// slot's lock, so concurrent first callers wait and then share the one
/// engine. A failed load leaves the slot uninitialized and the next call
/// tries again.
pub struct ModelSlot<B: Backend> {
    weights_path: PathBuf,
    classes_path: PathBuf,
    device: B::Device,
    engine: Mutex<Option<Arc<InferenceEngine<B>>>>,
    /// Mirrors `engine.is_some()` without waiting on an in-flight load
    ready: AtomicBool,
}

impl<B: Backend> ModelSlot<B> {
    pub fn new(weights_path: impl Into<PathBuf>, classes_path: impl Into<PathBuf>, device: B::Device) -> Self {
        Self {
            weights_path: weights_path.into(),
            classes_path: classes_path.into(),
            device,
            engine: Mutex::new(None),
            ready: AtomicBool::new(false),
        }
    }

    // A panic inside a forward pass poisons the engine's own lock, not this one
    fn slot(&self) -> MutexGuard<'_, Option<Arc<InferenceEngine<B>>>> {
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The engine, loading it first if needed
    pub fn get_or_init(&self) -> Result<Arc<InferenceEngine<B>>> {
        let mut slot = self.slot();
        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }

        match InferenceEngine::load(&self.weights_path, &self.classes_path, &self.device) {
            Ok(engine) => {
                info!(
                    "Model ready: {} classes from {:?}",
                    engine.class_names().len(),
                    self.weights_path
                );
                let engine = Arc::new(engine);
                *slot = Some(Arc::clone(&engine));
                self.ready.store(true, Ordering::Release);
                Ok(engine)
            }
            Err(e) => {
                warn!("Model load failed: {}", e);
                Err(e)
            }
        }
    }

    /// Never blocks, even while another caller is loading
    pub fn is_loaded(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Drop the engine; the next call loads from disk again
    pub fn reset(&self) {
        let mut slot = self.slot();
        *slot = None;
        self.ready.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::backend::CpuBackend;
    use crate::inference::engine::tests::{png_bytes, write_model};
    use crate::utils::error::TriageError;
    use tempfile::tempdir;

    type TestBackend = CpuBackend;

    fn slot_in(dir: &Path) -> ModelSlot<TestBackend> {
        ModelSlot::new(dir.join("best.mpk"), dir.join("classes.json"), Default::default())
    }

    #[test]
    fn test_unavailable_then_ready_after_files_appear() {
        let dir = tempdir().unwrap();
        let slot = slot_in(dir.path());

        let err = slot.get_or_init().err().unwrap();
        assert!(matches!(err, TriageError::ModelUnavailable(_)));
        assert!(!slot.is_loaded());

        write_model(dir.path(), &["crack", "rust"]);
        slot.reset();
        let engine = slot.get_or_init().unwrap();
        assert!(slot.is_loaded());
        assert!(engine.predict_bytes(&png_bytes([1, 2, 3])).is_ok());
    }

    #[test]
    fn test_readiness_readable_during_load() {
        let dir = tempdir().unwrap();
        write_model(dir.path(), &["crack", "rust"]);
        let slot = slot_in(dir.path());

        // Same lock get_or_init holds while reading the checkpoint
        let held = slot.slot();
        assert!(!slot.is_loaded());
        drop(held);

        slot.get_or_init().unwrap();
        assert!(slot.is_loaded());
    }

    #[test]
    fn test_engine_is_reused() {
        let dir = tempdir().unwrap();
        write_model(dir.path(), &["crack", "rust"]);
        let slot = slot_in(dir.path());

        let a = slot.get_or_init().unwrap();
        let b = slot.get_or_init().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        slot.reset();
        assert!(!slot.is_loaded());
        let c = slot.get_or_init().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_concurrent_first_access_loads_once() {
        let dir = tempdir().unwrap();
        write_model(dir.path(), &["crack", "rust", "scratch"]);
        let slot = Arc::new(slot_in(dir.path()));

        let engines: Vec<_> = (0..4)
            .map(|_| {
                let slot = Arc::clone(&slot);
                std::thread::spawn(move || slot.get_or_init().unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        assert!(engines.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
