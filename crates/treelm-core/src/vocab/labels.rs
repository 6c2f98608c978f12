//! Dependency-relation label vocabulary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Maps dependency-relation labels (`nsubj`, `det`, ...) to dense indices.
///
/// Labels are only inserted during vocabulary learning; lookups made while
/// training or testing never grow the map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct LabelVocabulary {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelVocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a label if unseen and return its index.
    pub fn add(&mut self, label: &str) -> usize {
        if let Some(&i) = self.index.get(label) {
            return i;
        }
        let i = self.labels.len();
        self.labels.push(label.to_string());
        self.index.insert(label.to_string(), i);
        i
    }

    /// Index of a label, or `None` if it was never seen.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for LabelVocabulary {
    fn from(labels: Vec<String>) -> Self {
        let mut vocab = Self::new();
        for label in &labels {
            vocab.add(label);
        }
        vocab
    }
}

impl From<LabelVocabulary> for Vec<String> {
    fn from(vocab: LabelVocabulary) -> Self {
        vocab.labels
    }
}
