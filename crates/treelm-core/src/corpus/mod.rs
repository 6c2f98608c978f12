pub mod book;
pub mod tree;

pub use book::{BookCorpus, CorpusSource, Document};
pub use tree::{DependencyLabelMode, Sentence, TreeToken, Unroll, UnrollStep, ROOT_LABEL};
