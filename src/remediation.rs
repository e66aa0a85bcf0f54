//! Remediation checklists keyed by predicted label.
//!
//! The file is a JSON object mapping each label to an ordered list of steps:
//!
//! ```json
//! { "rust": ["Isolate the part", "Wire-brush the affected area"] }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, TriageError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemediationBook {
    procedures: HashMap<String, Vec<String>>,
}

impl RemediationBook {
    /// Read a procedures file. A missing file is an error; use
    /// [`RemediationBook::default`] for an empty book.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TriageError::Configuration(format!("cannot read procedures file {:?}: {}", path, e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Steps for `label` in order; empty when the label has none
    pub fn steps_for(&self, label: &str) -> &[String] {
        self.procedures.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOK: &str = r#"{
        "rust": ["Isolate the part", "Wire-brush the affected area", "Apply primer"],
        "crack": ["Tag for scrap"]
    }"#;

    #[test]
    fn test_steps_keep_order() {
        let book = RemediationBook::from_json(BOOK).unwrap();
        assert_eq!(
            book.steps_for("rust"),
            ["Isolate the part", "Wire-brush the affected area", "Apply primer"]
        );
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_missing_label_is_empty() {
        let book = RemediationBook::from_json(BOOK).unwrap();
        assert!(book.steps_for("scratch").is_empty());
        assert!(RemediationBook::default().steps_for("rust").is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procedures.json");
        std::fs::write(&path, BOOK).unwrap();
        assert_eq!(RemediationBook::load(&path).unwrap().steps_for("crack"), ["Tag for scrap"]);

        assert!(matches!(
            RemediationBook::load(&dir.path().join("missing.json")),
            Err(TriageError::Configuration(_))
        ));

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(RemediationBook::load(&path), Err(TriageError::Serialization(_))));
    }
}
