//! Training configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use treelm_core::{DependencyLabelMode, Result, TreeLmError};

/// Hyper-parameters and data options for a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Number of recurrent hidden units.
    pub hidden_size: usize,
    /// Number of frequency-balanced output classes. Ignored with a class file.
    pub num_classes: usize,
    /// Extra steps of back-propagation through time along an unroll.
    pub bptt: usize,
    /// Initial learning rate.
    pub learning_rate: f32,
    /// L2 regularisation applied with every update.
    pub l2: f32,
    /// Validation log-probability must improve by this factor to keep the
    /// learning rate unchanged.
    pub min_improvement: f64,
    pub max_epochs: usize,
    /// Words seen fewer times are merged into `<unk>`.
    pub min_word_occurrence: u64,
    /// Hash table size of the direct (maximum-entropy) connections; 0 disables them.
    pub direct_size: usize,
    /// Number of history words hashed into the direct connections.
    pub direct_order: usize,
    pub label_mode: DependencyLabelMode,
    /// Keep labels seen higher up the path switched on instead of using a
    /// one-hot vector of the current label.
    pub accumulate_labels: bool,
    /// `word class` file; switches class assignment to external mode.
    pub class_file: Option<PathBuf>,
    /// Seed for weight initialisation.
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            hidden_size: 100,
            num_classes: 100,
            bptt: 4,
            learning_rate: 0.1,
            l2: 1e-7,
            min_improvement: 1.003,
            max_epochs: 20,
            min_word_occurrence: 1,
            direct_size: 0,
            direct_order: 3,
            label_mode: DependencyLabelMode::Ignore,
            accumulate_labels: false,
            class_file: None,
            seed: 1,
        }
    }
}

impl TrainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON configuration file. Missing fields keep their defaults.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn with_bptt(mut self, bptt: usize) -> Self {
        self.bptt = bptt;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_l2(mut self, l2: f32) -> Self {
        self.l2 = l2;
        self
    }

    pub fn with_min_improvement(mut self, min_improvement: f64) -> Self {
        self.min_improvement = min_improvement;
        self
    }

    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_min_word_occurrence(mut self, min_word_occurrence: u64) -> Self {
        self.min_word_occurrence = min_word_occurrence;
        self
    }

    /// Enable direct connections with a hash table of `size` weights over
    /// `order` history words.
    pub fn with_direct_connections(mut self, size: usize, order: usize) -> Self {
        self.direct_size = size;
        self.direct_order = order;
        self
    }

    pub fn with_label_mode(mut self, label_mode: DependencyLabelMode) -> Self {
        self.label_mode = label_mode;
        self
    }

    pub fn with_accumulated_labels(mut self, accumulate: bool) -> Self {
        self.accumulate_labels = accumulate;
        self
    }

    pub fn with_class_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.class_file = Some(path.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Whether classes come from a class file rather than frequency balancing.
    pub fn uses_class_file(&self) -> bool {
        self.class_file.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(TreeLmError::InvalidConfig(msg.to_string()));
        if self.hidden_size == 0 {
            return invalid("hidden size must be positive");
        }
        if self.num_classes == 0 && !self.uses_class_file() {
            return invalid("number of classes must be positive");
        }
        if !(self.learning_rate > 0.0) {
            return invalid("learning rate must be positive");
        }
        if self.l2 < 0.0 {
            return invalid("L2 regularisation must not be negative");
        }
        if self.min_improvement < 1.0 {
            return invalid("minimum improvement factor must be at least 1");
        }
        if self.max_epochs == 0 {
            return invalid("at least one epoch is required");
        }
        if self.direct_size > 0 && self.direct_size < 2 {
            return invalid("direct connections need at least 2 hash slots");
        }
        if self.direct_size > 0 && self.direct_order == 0 {
            return invalid("direct connections need an order of at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TrainerConfig::new()
            .with_hidden_size(30)
            .with_num_classes(5)
            .with_direct_connections(1000, 2)
            .with_label_mode(DependencyLabelMode::Feature)
            .with_class_file("classes.txt");

        assert_eq!(config.hidden_size, 30);
        assert_eq!(config.num_classes, 5);
        assert_eq!(config.direct_size, 1000);
        assert_eq!(config.direct_order, 2);
        assert!(config.uses_class_file());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(TrainerConfig::new().with_hidden_size(0).validate().is_err());
        assert!(TrainerConfig::new().with_num_classes(0).validate().is_err());
        assert!(TrainerConfig::new()
            .with_num_classes(0)
            .with_class_file("c.txt")
            .validate()
            .is_ok());
        assert!(TrainerConfig::new().with_learning_rate(0.0).validate().is_err());
        assert!(TrainerConfig::new().with_min_improvement(0.5).validate().is_err());
        assert!(TrainerConfig::new()
            .with_direct_connections(100, 0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: TrainerConfig =
            serde_json::from_str(r#"{"hidden_size": 12, "label_mode": "feature"}"#).unwrap();
        assert_eq!(config.hidden_size, 12);
        assert_eq!(config.label_mode, DependencyLabelMode::Feature);
        assert_eq!(config.num_classes, TrainerConfig::default().num_classes);
    }
}
