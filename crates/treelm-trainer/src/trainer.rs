//! Training and evaluation loop over unrolled dependency trees.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};
use treelm_core::vocab::{END_OF_SENTENCE, UNKNOWN_WORD};
use treelm_core::{
    ClassAssignment, ClassPartition, CorpusSource, DependencyLabelMode, Document, LabelVocabulary,
    Result, TreeLmError, Vocabulary, WordClasses,
};

use crate::config::TrainerConfig;
use crate::model::{ModelDims, RnnModel};
use crate::persist;
use crate::schedule::{AnnealingPolicy, HalvingSchedule};
use crate::state::RnnState;

/// Where the engine is in its lifecycle.
///
/// `Idle -> VocabularyLearning -> ClassAssignment -> Training -> Evaluating -> Idle`.
/// A loaded model starts in `Idle` and can only be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    VocabularyLearning,
    ClassAssignment,
    Training,
    Evaluating,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::VocabularyLearning => "learning the vocabulary",
            Phase::ClassAssignment => "assigning classes",
            Phase::Training => "training",
            Phase::Evaluating => "evaluating",
        };
        f.write_str(name)
    }
}

/// Scores of a pass over a corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Sum of log10 probabilities over all scored tokens.
    pub log10_prob: f64,
    pub perplexity: f64,
    /// Number of scored tokens; each sentence token counts once.
    pub word_count: usize,
    /// log10 probability of each sentence, in corpus order.
    pub sentence_scores: Vec<f64>,
}

impl Evaluation {
    fn new(log10_prob: f64, word_count: usize, sentence_scores: Vec<f64>) -> Self {
        let perplexity = if word_count > 0 {
            10f64.powf(-log10_prob / word_count as f64)
        } else {
            f64::NAN
        };
        Self {
            log10_prob,
            perplexity,
            word_count,
            sentence_scores,
        }
    }
}

/// Outcome of [`TreeLm::train`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub final_learning_rate: f32,
    pub best_valid: Evaluation,
}

/// Dependency-tree RNN language model: vocabulary, classes, model and the
/// loop driving them.
pub struct TreeLm {
    config: TrainerConfig,
    phase: Phase,
    vocab: Vocabulary,
    labels: LabelVocabulary,
    model: Option<RnnModel>,
}

impl TreeLm {
    pub fn new(config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            phase: Phase::Idle,
            vocab: Vocabulary::new(),
            labels: LabelVocabulary::new(),
            model: None,
        })
    }

    /// Load a model directory written by [`TreeLm::save`].
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let saved = persist::load(dir.as_ref())?;
        Ok(Self {
            config: saved.config,
            phase: Phase::Idle,
            vocab: saved.vocab,
            labels: saved.labels,
            model: Some(saved.model),
        })
    }

    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let model = self.model.as_ref().ok_or_else(|| self.wrong_phase("save"))?;
        persist::save(dir.as_ref(), &self.config, &self.vocab, &self.labels, model)
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn labels(&self) -> &LabelVocabulary {
        &self.labels
    }

    pub fn model(&self) -> Option<&RnnModel> {
        self.model.as_ref()
    }

    pub fn partition(&self) -> Option<&ClassPartition> {
        self.model.as_ref().map(RnnModel::partition)
    }

    fn wrong_phase(&self, operation: &'static str) -> TreeLmError {
        TreeLmError::InvalidPhase {
            operation,
            phase: self.phase.to_string(),
        }
    }

    fn enter(&mut self, next: Phase, operation: &'static str) -> Result<()> {
        let allowed = match next {
            Phase::VocabularyLearning => {
                matches!(self.phase, Phase::Idle | Phase::VocabularyLearning)
                    && self.model.is_none()
            }
            Phase::ClassAssignment => {
                matches!(self.phase, Phase::VocabularyLearning | Phase::ClassAssignment)
            }
            Phase::Training => matches!(self.phase, Phase::ClassAssignment | Phase::Training),
            Phase::Evaluating => {
                matches!(self.phase, Phase::Idle | Phase::Training) && self.model.is_some()
            }
            Phase::Idle => true,
        };
        if !allowed {
            return Err(self.wrong_phase(operation));
        }
        debug!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
        Ok(())
    }

    /// Count every word of the training corpus, prune rare words into
    /// `<unk>` and sort the vocabulary.
    ///
    /// Each sentence contributes one `</s>` and each token is counted once,
    /// however many unrolls pass through it. Dependency labels are
    /// collected in feature mode. With a class file the vocabulary is sorted
    /// by class, otherwise by frequency.
    pub fn learn_vocabulary(&mut self, corpus: &dyn CorpusSource) -> Result<()> {
        self.enter(Phase::VocabularyLearning, "learn the vocabulary")?;
        let mode = self.config.label_mode;
        let mut vocab = Vocabulary::new();
        let mut labels = LabelVocabulary::new();
        let mut tokens = 0usize;

        for (doc_index, document) in corpus.documents()?.iter().enumerate() {
            for (sentence_index, sentence) in document.sentences.iter().enumerate() {
                vocab.add_or_increment(END_OF_SENTENCE);
                for unroll in sentence.unroll(sentence_index, mode)? {
                    for step in unroll.steps.iter().filter(|s| s.first_visit) {
                        vocab.add_or_increment(&step.word);
                        if let Some(label) = &step.label {
                            labels.add(label);
                        }
                        tokens += 1;
                    }
                }
            }
            debug!(document = doc_index, words = vocab.len(), "counted document");
        }
        if tokens == 0 {
            return Err(TreeLmError::EmptyCorpus);
        }

        let pruned = vocab.prune(self.config.min_word_occurrence);
        match &self.config.class_file {
            Some(path) => {
                WordClasses::from_path(path)?.apply(&mut vocab)?;
                vocab.sort_by_class();
            }
            None => vocab.sort_by_frequency(),
        }

        info!(
            tokens,
            words = vocab.len(),
            pruned,
            labels = labels.len(),
            "learned vocabulary"
        );
        self.vocab = vocab;
        self.labels = labels;
        Ok(())
    }

    /// Partition the vocabulary into output classes and initialise the
    /// model weights for that layout.
    pub fn assign_classes(&mut self) -> Result<&ClassPartition> {
        self.enter(Phase::ClassAssignment, "assign classes")?;
        let assignment = if self.config.uses_class_file() {
            ClassAssignment::External
        } else {
            ClassAssignment::FrequencyBalanced {
                num_classes: self.config.num_classes,
            }
        };
        let partition = assignment.assign(&mut self.vocab)?;

        let num_labels = match self.config.label_mode {
            DependencyLabelMode::Feature => self.labels.len(),
            _ => 0,
        };
        let dims = ModelDims {
            vocab_size: self.vocab.len(),
            hidden_size: self.config.hidden_size,
            num_classes: partition.num_classes(),
            num_labels,
            direct_size: self.config.direct_size,
            direct_order: self.config.direct_order,
            bptt: self.config.bptt,
        };
        let model = RnnModel::new(dims, &self.vocab, partition, self.config.seed)?;
        info!(?dims, "initialised model");
        Ok(self.model.insert(model).partition())
    }

    /// Train with the default [`HalvingSchedule`].
    pub fn train(
        &mut self,
        train: &dyn CorpusSource,
        valid: Option<&dyn CorpusSource>,
    ) -> Result<TrainingSummary> {
        let mut policy = HalvingSchedule::new(self.config.min_improvement);
        self.train_with_policy(train, valid, &mut policy)
    }

    /// Run epochs of online training until the policy stops or the epoch
    /// limit is reached. Without a validation corpus the training scores
    /// drive the policy.
    pub fn train_with_policy(
        &mut self,
        train: &dyn CorpusSource,
        valid: Option<&dyn CorpusSource>,
        policy: &mut dyn AnnealingPolicy,
    ) -> Result<TrainingSummary> {
        self.enter(Phase::Training, "train")?;
        let train_docs = train.documents()?;
        let valid_docs = valid.map(|v| v.documents()).transpose()?;

        let config = &self.config;
        let vocab = &self.vocab;
        let labels = &self.labels;
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| TreeLmError::InvalidPhase {
                operation: "train",
                phase: Phase::Training.to_string(),
            })?;

        let mut learning_rate = config.learning_rate;
        let mut best_weights = model.weights().clone();
        let mut best_valid: Option<Evaluation> = None;
        let mut epochs = 0;

        for epoch in 0..config.max_epochs {
            let started = Instant::now();
            let train_eval = {
                let lr = learning_rate;
                let l2 = config.l2;
                let mut state = model.new_state(0);
                run_pass(&train_docs, vocab, labels, config, &mut state, None, |state, word| {
                    model.train_step(state, word, lr, l2)
                })?
            };
            let valid_eval = match &valid_docs {
                Some(docs) => {
                    let mut state = model.new_state(0);
                    let scorer = &*model;
                    run_pass(docs, vocab, labels, config, &mut state, None, |state, word| {
                        scorer.score(state, word)
                    })?
                }
                None => train_eval.clone(),
            };
            epochs = epoch + 1;

            info!(
                epoch = epochs,
                learning_rate,
                train_perplexity = train_eval.perplexity,
                valid_perplexity = valid_eval.perplexity,
                valid_log10_prob = valid_eval.log10_prob,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "epoch complete"
            );

            let step = policy.after_epoch(valid_eval.log10_prob, learning_rate);
            if step.rollback {
                warn!(epoch = epochs, "validation got worse, rolling back weights");
                model.restore(best_weights.clone());
            } else {
                best_weights = model.weights().clone();
                best_valid = Some(valid_eval);
            }
            learning_rate = step.learning_rate;
            if step.stop {
                info!(epoch = epochs, "stopping: validation no longer improving");
                break;
            }
        }

        let best_valid = best_valid.ok_or(TreeLmError::EmptyCorpus)?;
        Ok(TrainingSummary {
            epochs,
            final_learning_rate: learning_rate,
            best_valid,
        })
    }

    /// Score a corpus without updating weights.
    ///
    /// Every unroll is run so that recurrent state follows the tree, but a
    /// token is only scored on its first visit. When `features` is given,
    /// one tab-separated line per scored token is written to it: sentence
    /// index, position, word, label, log10 probability and the hidden
    /// activations.
    pub fn evaluate(
        &mut self,
        corpus: &dyn CorpusSource,
        features: Option<&mut dyn Write>,
    ) -> Result<Evaluation> {
        self.enter(Phase::Evaluating, "evaluate")?;
        let result = self.evaluate_documents(corpus, features);
        self.phase = Phase::Idle;

        if let Ok(eval) = &result {
            info!(
                words = eval.word_count,
                sentences = eval.sentence_scores.len(),
                log10_prob = eval.log10_prob,
                perplexity = eval.perplexity,
                "evaluation complete"
            );
        }
        result
    }

    fn evaluate_documents(
        &self,
        corpus: &dyn CorpusSource,
        features: Option<&mut dyn Write>,
    ) -> Result<Evaluation> {
        let model = self.model.as_ref().ok_or_else(|| self.wrong_phase("evaluate"))?;
        let documents = corpus.documents()?;
        let mut state = model.new_state(0);
        run_pass(
            &documents,
            &self.vocab,
            &self.labels,
            &self.config,
            &mut state,
            features,
            |state, word| model.score(state, word),
        )
    }
}

/// Walk every unroll of every sentence, feeding each resolvable word to
/// `step` and adding up first-visit scores.
///
/// Words that resolve neither to themselves nor to `<unk>` are skipped
/// without touching the state.
fn run_pass<F>(
    documents: &[Document],
    vocab: &Vocabulary,
    labels: &LabelVocabulary,
    config: &TrainerConfig,
    state: &mut RnnState,
    mut features: Option<&mut dyn Write>,
    mut step: F,
) -> Result<Evaluation>
where
    F: FnMut(&mut RnnState, usize) -> f64,
{
    let mode = config.label_mode;
    let mut total = 0.0f64;
    let mut word_count = 0usize;
    let mut skipped = 0usize;
    let mut sentence_scores = Vec::new();

    for document in documents {
        for (sentence_index, sentence) in document.sentences.iter().enumerate() {
            let mut sentence_score = 0.0f64;
            for unroll in sentence.unroll(sentence_index, mode)? {
                state.reset();
                for unroll_step in &unroll.steps {
                    let Some(word) = vocab.resolve(&unroll_step.word) else {
                        skipped += 1;
                        continue;
                    };
                    if mode == DependencyLabelMode::Feature {
                        let label = unroll_step.label.as_deref().and_then(|l| labels.index_of(l));
                        state.update_features(label, config.accumulate_labels);
                    }

                    let log10_prob = step(state, word);
                    if !unroll_step.first_visit {
                        continue;
                    }
                    sentence_score += log10_prob;
                    word_count += 1;

                    if let Some(sink) = features.as_deref_mut() {
                        write!(
                            sink,
                            "{}\t{}\t{}\t{}\t{:.6}\t",
                            sentence_scores.len(),
                            unroll_step.position,
                            unroll_step.word,
                            unroll_step.label.as_deref().unwrap_or("-"),
                            log10_prob
                        )?;
                        let activations: Vec<String> =
                            state.hidden.iter().map(|a| format!("{:.4}", a)).collect();
                        writeln!(sink, "{}", activations.join(" "))?;
                    }
                }
            }
            total += sentence_score;
            sentence_scores.push(sentence_score);
        }
    }

    if skipped > 0 {
        debug!(skipped, unknown = UNKNOWN_WORD, "skipped out-of-vocabulary steps");
    }
    Ok(Evaluation::new(total, word_count, sentence_scores))
}
