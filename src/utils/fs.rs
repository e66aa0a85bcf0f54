//! Filesystem helpers: output directories and the class-name list.

use std::fs;
use std::path::Path;

use tracing::debug;

use super::error::{Result, TriageError};

/// Create `dir` and its parents if needed
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Write the class list as a pretty-printed JSON array.
///
/// Index `i` of the list names output neuron `i` of the classifier.
pub fn save_class_names(path: &Path, class_names: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let json = serde_json::to_string_pretty(class_names)?;
    fs::write(path, json)?;
    debug!("Wrote {} class names to {:?}", class_names.len(), path);
    Ok(())
}

/// Read a class list written by [`save_class_names`]
pub fn load_class_names(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Err(TriageError::ModelUnavailable(format!(
            "class list not found at {:?}",
            path
        )));
    }
    let contents = fs::read_to_string(path)?;
    let names: Vec<String> = serde_json::from_str(&contents).map_err(|e| {
        TriageError::Configuration(format!("class list {:?} is not a JSON string array: {}", path, e))
    })?;
    if names.is_empty() {
        return Err(TriageError::Configuration(format!(
            "class list {:?} is empty",
            path
        )));
    }
    Ok(names)
}
