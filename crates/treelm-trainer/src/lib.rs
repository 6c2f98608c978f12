//! # treelm Trainer
//!
//! Recurrent language model over unrolled dependency trees: configuration,
//! the hierarchical-softmax RNN, learning-rate annealing, model directories
//! and the [`TreeLm`] engine tying them into a train/evaluate loop.
//!
//! ```no_run
//! use treelm_core::BookCorpus;
//! use treelm_trainer::{TrainerConfig, TreeLm};
//!
//! # fn main() -> treelm_core::Result<()> {
//! let train: BookCorpus = ["train.jsonl"].into_iter().collect();
//! let valid: BookCorpus = ["valid.jsonl"].into_iter().collect();
//!
//! let mut lm = TreeLm::new(TrainerConfig::new().with_hidden_size(50))?;
//! lm.learn_vocabulary(&train)?;
//! lm.assign_classes()?;
//! let summary = lm.train(&train, Some(&valid))?;
//! println!("best perplexity {:.2}", summary.best_valid.perplexity);
//! lm.save("model")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod model;
pub mod persist;
pub mod schedule;
pub mod state;
pub mod trainer;

pub use config::TrainerConfig;
pub use model::{ModelDims, RnnModel, StepOutput, Weights};
pub use schedule::{AnnealingPolicy, AnnealingStep, HalvingSchedule};
pub use state::RnnState;
pub use trainer::{Evaluation, Phase, TrainingSummary, TreeLm};
