//! # Dependency Trees and their Unrolls
//!
//! A sentence is a list of tokens, each pointing at its syntactic head.
//! The recurrent model cannot consume a tree directly, so every sentence is
//! unrolled into one path per leaf, running from the root down to that
//! leaf. Recurrent state is reset at the start of every unroll.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeLmError};
use crate::vocab::is_valid_word;

/// Label given to the root token when the tree leaves it unlabeled.
pub const ROOT_LABEL: &str = "ROOT";

/// How dependency labels reach the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyLabelMode {
    /// Labels are dropped.
    #[default]
    Ignore,
    /// Labels are glued onto the word as `word:label`.
    Concatenate,
    /// Labels are fed to the model as a separate feature vector.
    Feature,
}

impl DependencyLabelMode {
    /// Numeric code used on the command line (0, 1, 2).
    pub fn code(self) -> u8 {
        match self {
            DependencyLabelMode::Ignore => 0,
            DependencyLabelMode::Concatenate => 1,
            DependencyLabelMode::Feature => 2,
        }
    }
}

impl TryFrom<u8> for DependencyLabelMode {
    type Error = TreeLmError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(DependencyLabelMode::Ignore),
            1 => Ok(DependencyLabelMode::Concatenate),
            2 => Ok(DependencyLabelMode::Feature),
            other => Err(TreeLmError::InvalidConfig(format!(
                "unknown dependency label mode {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DependencyLabelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DependencyLabelMode::Ignore => "ignore",
            DependencyLabelMode::Concatenate => "concatenate",
            DependencyLabelMode::Feature => "feature",
        };
        f.write_str(name)
    }
}

/// A token of a dependency-parsed sentence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeToken {
    /// Surface form.
    pub word: String,
    /// 1-based position of the head token, 0 for the root.
    pub head: usize,
    /// Relation to the head.
    #[serde(default)]
    pub label: String,
}

impl TreeToken {
    pub fn new(word: impl Into<String>, head: usize, label: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            head,
            label: label.into(),
        }
    }
}

/// A dependency-parsed sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub tokens: Vec<TreeToken>,
}

/// One step of an unroll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrollStep {
    /// Word token, already concatenated with its label in
    /// [`DependencyLabelMode::Concatenate`].
    pub word: String,
    /// Incoming dependency label, only in [`DependencyLabelMode::Feature`].
    pub label: Option<String>,
    /// 1-based position of the token in its sentence.
    pub position: usize,
    /// Whether this is the first unroll of the sentence visiting the token.
    pub first_visit: bool,
}

/// A root-to-leaf path through a dependency tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unroll {
    pub steps: Vec<UnrollStep>,
}

impl Sentence {
    pub fn new(tokens: Vec<TreeToken>) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Unroll the tree into one root-to-leaf path per leaf, leaves taken in
    /// sentence order.
    ///
    /// Words must be non-empty and free of whitespace, as must labels in
    /// [`DependencyLabelMode::Concatenate`]. `sentence_index` is only used
    /// in error messages.
    pub fn unroll(&self, sentence_index: usize, mode: DependencyLabelMode) -> Result<Vec<Unroll>> {
        let n = self.tokens.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let malformed = |reason: String| TreeLmError::MalformedTree {
            sentence: sentence_index,
            reason,
        };

        let mut has_children = vec![false; n];
        let mut root = None;
        for (i, token) in self.tokens.iter().enumerate() {
            if !is_valid_word(&token.word) {
                return Err(malformed(format!(
                    "token {} has unusable word {:?}",
                    i + 1,
                    token.word
                )));
            }
            if mode == DependencyLabelMode::Concatenate
                && token.label.contains(char::is_whitespace)
            {
                return Err(malformed(format!(
                    "token {} has label {:?} with whitespace",
                    i + 1,
                    token.label
                )));
            }
            match token.head {
                0 if root.is_some() => {
                    return Err(malformed(format!("second root at position {}", i + 1)))
                }
                0 => root = Some(i),
                head if head > n => {
                    return Err(malformed(format!(
                        "token {} points at head {} beyond {} tokens",
                        i + 1,
                        head,
                        n
                    )))
                }
                head if head == i + 1 => {
                    return Err(malformed(format!("token {} is its own head", i + 1)))
                }
                head => has_children[head - 1] = true,
            }
        }
        if root.is_none() {
            return Err(malformed("no root token".into()));
        }

        let mut visited = vec![false; n];
        let mut unrolls = Vec::new();
        for leaf in (0..n).filter(|&i| !has_children[i]) {
            let mut path = vec![leaf];
            let mut node = leaf;
            while self.tokens[node].head != 0 {
                node = self.tokens[node].head - 1;
                if path.len() > n {
                    return Err(malformed(format!("cycle through token {}", node + 1)));
                }
                path.push(node);
            }
            path.reverse();

            let steps = path
                .into_iter()
                .map(|i| {
                    let step = self.step(i, mode, !visited[i]);
                    visited[i] = true;
                    step
                })
                .collect();
            unrolls.push(Unroll { steps });
        }

        // A cycle without any leaf hanging off it leaves tokens unvisited.
        if let Some(orphan) = visited.iter().position(|v| !v) {
            return Err(malformed(format!(
                "token {} is not reachable from the root",
                orphan + 1
            )));
        }
        Ok(unrolls)
    }

    fn step(&self, i: usize, mode: DependencyLabelMode, first_visit: bool) -> UnrollStep {
        let token = &self.tokens[i];
        let label = if token.label.is_empty() && token.head == 0 {
            ROOT_LABEL
        } else {
            token.label.as_str()
        };
        let (word, label) = match mode {
            DependencyLabelMode::Ignore => (token.word.clone(), None),
            DependencyLabelMode::Concatenate => (format!("{}:{}", token.word, label), None),
            DependencyLabelMode::Feature => (token.word.clone(), Some(label.to_string())),
        };
        UnrollStep {
            word,
            label,
            position: i + 1,
            first_visit,
        }
    }
}
