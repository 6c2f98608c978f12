//! # treelm Core
//!
//! Vocabulary construction, hierarchical-softmax word classes and
//! dependency-tree unrolling for recurrent language models that read
//! sentences as root-to-leaf paths instead of flat word sequences.
//!
//! ## Quick Start
//!
//! ```rust
//! use treelm_core::vocab::{ClassAssignment, Vocabulary};
//!
//! let mut vocab = Vocabulary::new();
//! for word in ["the", "cat", "the", "dog", "the"] {
//!     vocab.add_or_increment(word);
//! }
//! vocab.set_count("</s>", 2);
//! vocab.sort_by_frequency();
//!
//! let partition = ClassAssignment::FrequencyBalanced { num_classes: 2 }
//!     .assign(&mut vocab)
//!     .unwrap();
//! assert_eq!(vocab.word(0), Some("</s>"));
//! assert_eq!(partition.num_classes(), 2);
//! ```
pub mod corpus;
pub mod error;
pub mod vocab;

// Re-export primary API
pub use corpus::{
    BookCorpus, CorpusSource, DependencyLabelMode, Document, Sentence, TreeToken, Unroll,
    UnrollStep,
};
pub use error::{Result, TreeLmError};
pub use vocab::{
    ClassAssignment, ClassPartition, LabelVocabulary, VocabEntry, Vocabulary, WordClasses,
};
