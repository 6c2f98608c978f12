//! # treelm
//!
//! Recurrent neural network language models that read each sentence as the
//! root-to-leaf paths of its dependency tree.
//!
//! This crate re-exports [`treelm_core`] (vocabulary, word classes, corpus
//! unrolling) and [`treelm_trainer`] (model, training loop, persistence).

pub use treelm_core::{
    BookCorpus, ClassAssignment, ClassPartition, CorpusSource, DependencyLabelMode, Document,
    LabelVocabulary, Result, Sentence, TreeLmError, TreeToken, Vocabulary, WordClasses,
};
pub use treelm_trainer::{
    AnnealingPolicy, Evaluation, HalvingSchedule, Phase, TrainerConfig, TrainingSummary, TreeLm,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facade_runs_a_pass() {
        let sentence = Sentence::new(vec![
            TreeToken::new("dogs", 2, "nsubj"),
            TreeToken::new("bark", 0, "ROOT"),
        ]);
        let corpus = Document::new(vec![sentence; 4]);

        let config = TrainerConfig::new()
            .with_hidden_size(4)
            .with_num_classes(2)
            .with_max_epochs(2);
        let mut lm = TreeLm::new(config).unwrap();
        lm.learn_vocabulary(&corpus).unwrap();
        lm.assign_classes().unwrap();
        let summary = lm.train(&corpus, None).unwrap();

        assert!(summary.epochs >= 1);
        assert_eq!(summary.best_valid.word_count, 8);
    }
}
