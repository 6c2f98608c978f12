//! Recurrent state carried along one unroll.

use std::collections::VecDeque;

/// Value the hidden layer is reset to at the start of an unroll.
const RESET_ACTIVATION: f32 = 1.0;

/// Inputs of one past step, kept for back-propagation through time.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Frame {
    pub word: usize,
    pub features: Vec<f32>,
    pub prev_hidden: Vec<f32>,
}

/// Hidden activations, label features and histories for one unroll.
///
/// Created once per pass and [`reset`](RnnState::reset) at the start of
/// every unroll.
#[derive(Debug, Clone, PartialEq)]
pub struct RnnState {
    /// Hidden layer after the last step (input to the next one).
    pub hidden: Vec<f32>,
    /// Dependency-label feature vector for the current step.
    pub features: Vec<f32>,
    /// Word fed as input to the next step.
    pub(crate) last_word: usize,
    /// Previous words, most recent first, for the direct connections.
    pub(crate) history: VecDeque<usize>,
    /// Past steps, most recent first, for back-propagation through time.
    pub(crate) frames: VecDeque<Frame>,
    reset_word: usize,
    max_history: usize,
    max_frames: usize,
}

impl RnnState {
    /// `reset_word` is the vocabulary index fed at the start of an unroll
    /// (the end-of-sentence token).
    pub fn new(
        hidden_size: usize,
        num_labels: usize,
        reset_word: usize,
        max_history: usize,
        max_frames: usize,
    ) -> Self {
        let mut state = Self {
            hidden: vec![RESET_ACTIVATION; hidden_size],
            features: vec![0.0; num_labels],
            last_word: reset_word,
            history: VecDeque::with_capacity(max_history + 1),
            frames: VecDeque::with_capacity(max_frames + 1),
            reset_word,
            max_history,
            max_frames,
        };
        state.reset();
        state
    }

    /// Start a new unroll.
    pub fn reset(&mut self) {
        self.hidden.fill(RESET_ACTIVATION);
        self.reset_features();
        self.last_word = self.reset_word;
        self.history.clear();
        if self.max_history > 0 {
            self.history.push_front(self.reset_word);
        }
        self.frames.clear();
    }

    pub fn reset_features(&mut self) {
        self.features.fill(0.0);
    }

    /// Switch on the feature of the current node's incoming label. Unless
    /// `accumulate` is set, labels of earlier nodes are switched off first.
    /// Unknown labels (`None`) leave an empty vector in one-hot mode.
    pub fn update_features(&mut self, label: Option<usize>, accumulate: bool) {
        if !accumulate {
            self.reset_features();
        }
        if let Some(label) = label {
            if let Some(slot) = self.features.get_mut(label) {
                *slot = 1.0;
            }
        }
    }

    /// Commit a step: `hidden` becomes the recurrent input of the next step
    /// and `word` its input word.
    pub(crate) fn advance(&mut self, word: usize, hidden: Vec<f32>) {
        if self.max_frames > 0 {
            let frame = Frame {
                word: self.last_word,
                features: self.features.clone(),
                prev_hidden: std::mem::replace(&mut self.hidden, hidden),
            };
            self.frames.push_front(frame);
            self.frames.truncate(self.max_frames);
        } else {
            self.hidden = hidden;
        }

        if self.max_history > 0 {
            self.history.push_front(word);
            self.history.truncate(self.max_history);
        }
        self.last_word = word;
    }
}
