//! # Recurrent Model with Hierarchical Softmax
//!
//! A sigmoid recurrent layer reads the previous word of the unroll, the
//! previous hidden state and, optionally, a dependency-label feature
//! vector. The output factorises as P(class | h) * P(word | class, h), so a
//! step costs O(classes + class size) instead of O(vocabulary). Hashed
//! direct connections from the word history to both output layers can be
//! switched on for a maximum-entropy style boost.

use serde::{Deserialize, Serialize};
use treelm_core::{ClassPartition, Result, TreeLmError, Vocabulary};

use crate::state::{Frame, RnnState};

/// Error signals are clipped to this magnitude during back-propagation.
const GRADIENT_CUTOFF: f32 = 15.0;

/// Pre-activations are clamped before the sigmoid to avoid overflow.
const ACTIVATION_CLAMP: f32 = 50.0;

const HASH_PRIMES: [u64; 8] = [
    108_641_969,
    116_049_371,
    125_925_907,
    133_333_309,
    145_678_979,
    158_007_997,
    169_084_441,
    181_111_111,
];

/// Layer sizes; together with the vocabulary they fix the parameter layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDims {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_classes: usize,
    pub num_labels: usize,
    pub direct_size: usize,
    pub direct_order: usize,
    pub bptt: usize,
}

impl ModelDims {
    /// Reject layouts the forward pass cannot run on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(TreeLmError::InvalidConfig(msg.to_string()));
        if self.vocab_size == 0 || self.hidden_size == 0 || self.num_classes == 0 {
            return invalid("vocabulary, hidden layer and classes must be non-empty");
        }
        if self.direct_size == 1 {
            return invalid("direct connections need at least 2 hash slots");
        }
        if self.direct_size > 0 && self.direct_order == 0 {
            return invalid("direct connections need an order of at least 1");
        }
        Ok(())
    }
}

/// Dense weight blocks, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    /// `vocab_size x hidden_size`: input word embedding rows.
    pub input: Vec<f32>,
    /// `hidden_size x hidden_size`: row `i` feeds hidden unit `i`.
    pub recurrent: Vec<f32>,
    /// `hidden_size x num_labels`.
    pub feature: Vec<f32>,
    /// `num_classes x hidden_size`.
    pub class: Vec<f32>,
    /// `vocab_size x hidden_size`: output word rows.
    pub word: Vec<f32>,
    /// Hashed direct connections; first half for classes, second for words.
    pub direct: Vec<f32>,
}

impl Weights {
    fn zeros(dims: &ModelDims) -> Self {
        let h = dims.hidden_size;
        Self {
            input: vec![0.0; dims.vocab_size * h],
            recurrent: vec![0.0; h * h],
            feature: vec![0.0; h * dims.num_labels],
            class: vec![0.0; dims.num_classes * h],
            word: vec![0.0; dims.vocab_size * h],
            direct: vec![0.0; dims.direct_size],
        }
    }

    fn check(&self, dims: &ModelDims) -> Result<()> {
        let h = dims.hidden_size;
        let blocks = [
            ("input", self.input.len(), dims.vocab_size * h),
            ("recurrent", self.recurrent.len(), h * h),
            ("feature", self.feature.len(), h * dims.num_labels),
            ("class", self.class.len(), dims.num_classes * h),
            ("word", self.word.len(), dims.vocab_size * h),
            ("direct", self.direct.len(), dims.direct_size),
        ];
        for (name, found, expected) in blocks {
            if found != expected {
                return Err(TreeLmError::InvalidConfig(format!(
                    "{} weights have {} values, expected {}",
                    name, found, expected
                )));
            }
        }
        Ok(())
    }
}

/// Result of the forward pass for one target word.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub hidden: Vec<f32>,
    pub class: usize,
    pub class_probs: Vec<f32>,
    /// Probabilities over the members of `class`, in member order.
    pub word_probs: Vec<f32>,
    /// log10 P(word | history).
    pub log10_prob: f64,
    direct_keys: Vec<u64>,
}

/// The trainable recurrent language model.
#[derive(Debug, Clone)]
pub struct RnnModel {
    dims: ModelDims,
    weights: Weights,
    word_class: Vec<usize>,
    /// Position of each word among its class members.
    word_slot: Vec<usize>,
    partition: ClassPartition,
}

impl RnnModel {
    /// Build a randomly initialised model for `vocab` and its class partition.
    pub fn new(
        dims: ModelDims,
        vocab: &Vocabulary,
        partition: ClassPartition,
        seed: u64,
    ) -> Result<Self> {
        let mut weights = Weights::zeros(&dims);
        let mut rng = oorandom::Rand32::new(seed);
        let mut small = || {
            (0..3)
                .map(|_| rng.rand_float() * 0.2 - 0.1)
                .sum::<f32>()
        };
        for block in [
            &mut weights.input,
            &mut weights.recurrent,
            &mut weights.feature,
            &mut weights.class,
            &mut weights.word,
        ] {
            block.iter_mut().for_each(|w| *w = small());
        }
        Self::from_parts(dims, weights, vocab, partition)
    }

    /// Assemble a model from existing weights, checking every block size.
    pub fn from_parts(
        dims: ModelDims,
        weights: Weights,
        vocab: &Vocabulary,
        partition: ClassPartition,
    ) -> Result<Self> {
        dims.validate()?;
        if vocab.len() != dims.vocab_size {
            return Err(TreeLmError::InvalidConfig(format!(
                "model expects {} words, vocabulary has {}",
                dims.vocab_size,
                vocab.len()
            )));
        }
        if partition.num_classes() != dims.num_classes {
            return Err(TreeLmError::InvalidConfig(format!(
                "model expects {} classes, partition has {}",
                dims.num_classes,
                partition.num_classes()
            )));
        }
        weights.check(&dims)?;

        let word_class: Vec<usize> = (0..vocab.len()).map(|i| vocab.class_of(i)).collect();
        let mut word_slot = vec![0usize; vocab.len()];
        for members in partition.iter() {
            for (slot, &w) in members.iter().enumerate() {
                word_slot[w] = slot;
            }
        }

        Ok(Self {
            dims,
            weights,
            word_class,
            word_slot,
            partition,
        })
    }

    pub fn dims(&self) -> &ModelDims {
        &self.dims
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn partition(&self) -> &ClassPartition {
        &self.partition
    }

    /// Replace all weights, e.g. to roll back an epoch.
    pub fn restore(&mut self, weights: Weights) {
        self.weights = weights;
    }

    /// A state sized for this model.
    pub fn new_state(&self, reset_word: usize) -> RnnState {
        RnnState::new(
            self.dims.hidden_size,
            self.dims.num_labels,
            reset_word,
            if self.dims.direct_size > 0 {
                self.dims.direct_order
            } else {
                0
            },
            self.dims.bptt,
        )
    }

    /// Forward pass predicting `word` from the current state.
    pub fn forward(&self, state: &RnnState, word: usize) -> StepOutput {
        let hidden = self.compute_hidden(state);
        let class = self.word_class[word];
        let direct_keys = self.direct_keys(state);

        let class_probs = softmax((0..self.dims.num_classes).map(|c| {
            dot(self.class_row(c), &hidden) + self.direct_weight(&direct_keys, c as u64, false)
        }));
        let members = self.partition.members(class);
        let word_probs = softmax(members.iter().map(|&w| {
            dot(self.word_row(w), &hidden) + self.direct_weight(&direct_keys, w as u64, true)
        }));

        let prob = class_probs[class] as f64 * word_probs[self.word_slot[word]] as f64;
        StepOutput {
            hidden,
            class,
            class_probs,
            word_probs,
            log10_prob: prob.max(f64::MIN_POSITIVE).log10(),
            direct_keys,
        }
    }

    /// Score `word` without touching the weights and advance the state.
    pub fn score(&self, state: &mut RnnState, word: usize) -> f64 {
        let out = self.forward(state, word);
        let log10_prob = out.log10_prob;
        state.advance(word, out.hidden);
        log10_prob
    }

    /// Score `word`, apply one SGD update and advance the state.
    pub fn train_step(
        &mut self,
        state: &mut RnnState,
        word: usize,
        learning_rate: f32,
        l2: f32,
    ) -> f64 {
        let out = self.forward(state, word);
        self.backward(state, word, &out, learning_rate, l2);
        let log10_prob = out.log10_prob;
        state.advance(word, out.hidden);
        log10_prob
    }

    fn compute_hidden(&self, state: &RnnState) -> Vec<f32> {
        let h = self.dims.hidden_size;
        let l = self.dims.num_labels;
        let embedding = &self.weights.input[state.last_word * h..(state.last_word + 1) * h];
        (0..h)
            .map(|i| {
                let mut a = embedding[i]
                    + dot(&self.weights.recurrent[i * h..(i + 1) * h], &state.hidden);
                if l > 0 {
                    a += dot(&self.weights.feature[i * l..(i + 1) * l], &state.features);
                }
                sigmoid(a)
            })
            .collect()
    }

    fn backward(&mut self, state: &RnnState, word: usize, out: &StepOutput, lr: f32, l2: f32) {
        let h = self.dims.hidden_size;
        let mut hidden_err = vec![0.0f32; h];

        for (c, &p) in out.class_probs.iter().enumerate() {
            let err = clip(if c == out.class { 1.0 } else { 0.0 } - p);
            let row = &mut self.weights.class[c * h..(c + 1) * h];
            update_output_row(row, &mut hidden_err, &out.hidden, err, lr, l2);
            self.update_direct(&out.direct_keys, c as u64, false, err, lr);
        }

        let target_slot = self.word_slot[word];
        for (slot, &p) in out.word_probs.iter().enumerate() {
            let w = self.partition.members(out.class)[slot];
            let err = clip(if slot == target_slot { 1.0 } else { 0.0 } - p);
            let row = &mut self.weights.word[w * h..(w + 1) * h];
            update_output_row(row, &mut hidden_err, &out.hidden, err, lr, l2);
            self.update_direct(&out.direct_keys, w as u64, true, err, lr);
        }

        for (e, &a) in hidden_err.iter_mut().zip(&out.hidden) {
            *e = clip(*e) * a * (1.0 - a);
        }
        self.backpropagate_through_time(state, hidden_err, lr, l2);
    }

    /// Push the hidden error back along the current step and up to `bptt`
    /// earlier steps of the unroll, updating input, feature and recurrent
    /// weights.
    fn backpropagate_through_time(
        &mut self,
        state: &RnnState,
        mut err: Vec<f32>,
        lr: f32,
        l2: f32,
    ) {
        let h = self.dims.hidden_size;
        let l = self.dims.num_labels;
        let current = Frame {
            word: state.last_word,
            features: state.features.clone(),
            prev_hidden: state.hidden.clone(),
        };
        let mut recurrent_grad = vec![0.0f32; h * h];

        for frame in std::iter::once(&current).chain(state.frames.iter()) {
            let row = &mut self.weights.input[frame.word * h..(frame.word + 1) * h];
            for (w, &e) in row.iter_mut().zip(&err) {
                *w += lr * (e - l2 * *w);
            }

            if l > 0 && frame.features.iter().any(|&f| f != 0.0) {
                for i in 0..h {
                    let row = &mut self.weights.feature[i * l..(i + 1) * l];
                    for (w, &f) in row.iter_mut().zip(&frame.features) {
                        *w += lr * (err[i] * f - l2 * *w);
                    }
                }
            }

            for i in 0..h {
                let grad_row = &mut recurrent_grad[i * h..(i + 1) * h];
                for (g, &p) in grad_row.iter_mut().zip(&frame.prev_hidden) {
                    *g += err[i] * p;
                }
            }

            err = (0..h)
                .map(|j| {
                    let back: f32 = (0..h)
                        .map(|i| err[i] * self.weights.recurrent[i * h + j])
                        .sum();
                    let p = frame.prev_hidden[j];
                    clip(back) * p * (1.0 - p)
                })
                .collect();
            if err.iter().all(|&e| e == 0.0) {
                break;
            }
        }

        for (w, &g) in self.weights.recurrent.iter_mut().zip(&recurrent_grad) {
            *w += lr * (g - l2 * *w);
        }
    }

    fn class_row(&self, class: usize) -> &[f32] {
        let h = self.dims.hidden_size;
        &self.weights.class[class * h..(class + 1) * h]
    }

    fn word_row(&self, word: usize) -> &[f32] {
        let h = self.dims.hidden_size;
        &self.weights.word[word * h..(word + 1) * h]
    }

    /// One key for the bias plus one per history prefix.
    fn direct_keys(&self, state: &RnnState) -> Vec<u64> {
        if self.dims.direct_size == 0 {
            return Vec::new();
        }
        let mut keys = Vec::with_capacity(state.history.len() + 1);
        let mut key = HASH_PRIMES[0].wrapping_mul(HASH_PRIMES[1]);
        keys.push(key);
        for (order, &w) in state.history.iter().enumerate() {
            let prime = HASH_PRIMES[(order + 2) % HASH_PRIMES.len()];
            key = key
                .wrapping_mul(HASH_PRIMES[1])
                .wrapping_add(prime.wrapping_mul(w as u64 + 1));
            keys.push(key);
        }
        keys
    }

    fn direct_slot(&self, key: u64, output: u64, word_half: bool) -> usize {
        let half = (self.dims.direct_size / 2) as u64;
        let hashed = key.wrapping_add(output.wrapping_mul(HASH_PRIMES[7]));
        if word_half {
            (half + hashed % (self.dims.direct_size as u64 - half)) as usize
        } else {
            (hashed % half) as usize
        }
    }

    fn direct_weight(&self, keys: &[u64], output: u64, word_half: bool) -> f32 {
        keys.iter()
            .map(|&k| self.weights.direct[self.direct_slot(k, output, word_half)])
            .sum()
    }

    fn update_direct(&mut self, keys: &[u64], output: u64, word_half: bool, err: f32, lr: f32) {
        for &k in keys {
            let slot = self.direct_slot(k, output, word_half);
            self.weights.direct[slot] += lr * err;
        }
    }
}

/// Accumulate `err * row` into the hidden error, then move the row along
/// the gradient `err * hidden` with L2 decay.
fn update_output_row(
    row: &mut [f32],
    hidden_err: &mut [f32],
    hidden: &[f32],
    err: f32,
    lr: f32,
    l2: f32,
) {
    for ((w, e), &a) in row.iter_mut().zip(hidden_err.iter_mut()).zip(hidden) {
        *e += err * *w;
        *w += lr * (err * a - l2 * *w);
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x.clamp(-ACTIVATION_CLAMP, ACTIVATION_CLAMP)).exp())
}

#[inline]
fn clip(x: f32) -> f32 {
    x.clamp(-GRADIENT_CUTOFF, GRADIENT_CUTOFF)
}

fn softmax(scores: impl Iterator<Item = f32>) -> Vec<f32> {
    let mut values: Vec<f32> = scores.collect();
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
    values
}
