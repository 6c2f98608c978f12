//! # Word Vocabulary
//!
//! Owns the word <-> index mapping, the raw corpus counts and the output
//! class of every word. Indices are dense positions in the entry list; a
//! single hash map from word to position is rebuilt whenever the list is
//! reordered, so both directions always agree.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TreeLmError};

/// End-of-sentence token. Always present; index 0 after sorting.
pub const END_OF_SENTENCE: &str = "</s>";

/// Start-of-sentence token. Reserved, never part of a vocabulary.
pub const START_OF_SENTENCE: &str = "<s>";

/// Bucket for words pruned below the minimum occurrence.
pub const UNKNOWN_WORD: &str = "<unk>";

/// Header line preceding the serialized vocabulary records.
pub const VOCABULARY_HEADER: &str = "Vocabulary:";

/// A single vocabulary word with its corpus count and output class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabEntry {
    /// Surface form.
    pub word: String,
    /// Number of occurrences in the training corpus.
    pub count: u64,
    /// Output class used by the hierarchical softmax.
    pub class_index: usize,
    /// Smoothed unigram probability. Reset to 0 by class assignment.
    pub prob: f64,
}

impl VocabEntry {
    fn new(word: impl Into<String>, count: u64) -> Self {
        Self {
            word: word.into(),
            count,
            class_index: 0,
            prob: 0.0,
        }
    }
}

/// Ordered word list plus a word -> index map kept in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    entries: Vec<VocabEntry>,
    index: HashMap<String, usize>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocabulary {
    /// Create a vocabulary holding only the end-of-sentence token (count 0).
    pub fn new() -> Self {
        let mut vocab = Self {
            entries: Vec::new(),
            index: HashMap::new(),
        };
        vocab.push(VocabEntry::new(END_OF_SENTENCE, 0));
        vocab
    }

    fn push(&mut self, entry: VocabEntry) -> usize {
        let index = self.entries.len();
        self.index.insert(entry.word.clone(), index);
        self.entries.push(entry);
        index
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            self.index.insert(entry.word.clone(), i);
        }
    }

    /// Add a word occurrence and return the word's index.
    ///
    /// Unknown words get a new entry with count 1; known words have their
    /// count incremented.
    pub fn add_or_increment(&mut self, word: &str) -> usize {
        match self.index.get(word) {
            Some(&i) => {
                self.entries[i].count += 1;
                i
            }
            None => self.push(VocabEntry::new(word, 1)),
        }
    }

    /// Overwrite the count of a known word. Returns `false` if the word is
    /// not in the vocabulary.
    pub fn set_count(&mut self, word: &str, count: u64) -> bool {
        match self.index.get(word) {
            Some(&i) => {
                self.entries[i].count = count;
                true
            }
            None => false,
        }
    }

    /// Index of a word, or `None` if it is out of vocabulary.
    pub fn index_of(&self, word: &str) -> Option<usize> {
        self.index.get(word).copied()
    }

    /// Index of a word, falling back to `<unk>` when the vocabulary has one.
    pub fn resolve(&self, word: &str) -> Option<usize> {
        self.index_of(word).or_else(|| self.index_of(UNKNOWN_WORD))
    }

    /// Word stored at `index`.
    pub fn word(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.word.as_str())
    }

    pub fn entry(&self, index: usize) -> Option<&VocabEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[VocabEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [VocabEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all word counts.
    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// Output class of the word at `index`.
    pub fn class_of(&self, index: usize) -> usize {
        self.entries[index].class_index
    }

    /// Remove every word (other than `</s>`) seen fewer than `min_count`
    /// times, merging their counts into `<unk>`. Returns how many words
    /// were removed.
    pub fn prune(&mut self, min_count: u64) -> usize {
        let mut pruned_count = 0u64;
        let mut removed = 0usize;
        self.entries.retain(|e| {
            let keep =
                e.word == END_OF_SENTENCE || e.word == UNKNOWN_WORD || e.count >= min_count;
            if !keep {
                pruned_count += e.count;
                removed += 1;
            }
            keep
        });
        self.rebuild_index();

        if removed > 0 {
            match self.index.get(UNKNOWN_WORD) {
                Some(&i) => self.entries[i].count += pruned_count,
                None => {
                    self.push(VocabEntry::new(UNKNOWN_WORD, pruned_count));
                }
            }
            debug!(removed, pruned_count, min_count, "pruned rare words into <unk>");
        }
        removed
    }

    /// Sort by decreasing count with `</s>` pinned to index 0.
    ///
    /// The sort is stable: words with equal counts keep their relative
    /// order, so the result is not a strict total order over words but
    /// re-sorting an already sorted vocabulary leaves it unchanged.
    pub fn sort_by_frequency(&mut self) {
        self.entries.sort_by(|a, b| pin_end_of_sentence(a, b, || b.count.cmp(&a.count)));
        self.rebuild_index();
    }

    /// Sort with `</s>` first, then by decreasing class id, then by
    /// decreasing count. Words of one class become contiguous, which
    /// external-class compaction relies on.
    pub fn sort_by_class(&mut self) {
        self.entries.sort_by(|a, b| {
            pin_end_of_sentence(a, b, || {
                b.class_index
                    .cmp(&a.class_index)
                    .then_with(|| b.count.cmp(&a.count))
            })
        });
        self.rebuild_index();
    }

    /// Read `expected_size` records of `index count word class` in strictly
    /// ascending index order. A leading `Vocabulary:` header and blank lines
    /// are skipped.
    pub fn load<R: BufRead>(reader: R, expected_size: usize) -> Result<Self> {
        let mut vocab = Self {
            entries: Vec::with_capacity(expected_size),
            index: HashMap::with_capacity(expected_size),
        };

        for (line_no, line) in reader.lines().enumerate() {
            if vocab.len() == expected_size {
                break;
            }
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line == VOCABULARY_HEADER {
                continue;
            }

            let line_no = line_no + 1;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(TreeLmError::MalformedRecord {
                    line: line_no,
                    reason: format!("expected 4 columns, found {}", fields.len()),
                });
            }
            let found: usize = parse_field(fields[0], line_no, "index")?;
            let count: u64 = parse_field(fields[1], line_no, "count")?;
            let class_index: usize = parse_field(fields[3], line_no, "class")?;

            let expected = vocab.len();
            if found != expected {
                return Err(TreeLmError::IndexMismatch { expected, found });
            }

            if vocab.index.contains_key(fields[2]) {
                return Err(TreeLmError::MalformedRecord {
                    line: line_no,
                    reason: format!("duplicate word {:?}", fields[2]),
                });
            }

            let mut entry = VocabEntry::new(fields[2], count);
            entry.class_index = class_index;
            vocab.push(entry);
        }

        if vocab.len() != expected_size {
            return Err(TreeLmError::TruncatedVocabulary {
                expected: expected_size,
                read: vocab.len(),
            });
        }
        if vocab.index_of(END_OF_SENTENCE).is_none() {
            return Err(TreeLmError::MissingEndOfSentence(END_OF_SENTENCE.into()));
        }
        Ok(vocab)
    }

    /// Write the header followed by one `index count word class` row per word.
    ///
    /// Fails before writing anything if a word could not be read back, i.e.
    /// it is empty or contains whitespace.
    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        if let Some(i) = self.entries.iter().position(|e| !is_valid_word(&e.word)) {
            return Err(TreeLmError::MalformedRecord {
                line: i + 2,
                reason: format!("word {:?} cannot be stored", self.entries[i].word),
            });
        }
        writeln!(writer, "{}", VOCABULARY_HEADER)?;
        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(
                writer,
                "{:6}\t{:10}\t{}\t{}",
                i, entry.count, entry.word, entry.class_index
            )?;
        }
        Ok(())
    }
}

/// Whether `word` fits in a whitespace-separated record: non-empty and free
/// of whitespace.
pub fn is_valid_word(word: &str) -> bool {
    !word.is_empty() && !word.chars().any(char::is_whitespace)
}

fn pin_end_of_sentence(
    a: &VocabEntry,
    b: &VocabEntry,
    rest: impl FnOnce() -> Ordering,
) -> Ordering {
    match (a.word == END_OF_SENTENCE, b.word == END_OF_SENTENCE) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => rest(),
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, line: usize, name: &str) -> Result<T> {
    field.parse().map_err(|_| TreeLmError::MalformedRecord {
        line,
        reason: format!("invalid {} {:?}", name, field),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(words: &[(&str, u64)]) -> Vocabulary {
        let mut vocab = Vocabulary::new();
        for &(word, count) in words {
            vocab.add_or_increment(word);
            vocab.set_count(word, count);
        }
        vocab
    }

    #[test]
    fn test_add_or_increment() {
        let mut vocab = Vocabulary::new();
        let the = vocab.add_or_increment("the");
        assert_eq!(vocab.add_or_increment("the"), the);
        assert_eq!(vocab.entry(the).unwrap().count, 2);
        assert_eq!(vocab.index_of("the"), Some(the));
        assert_eq!(vocab.word(the), Some("the"));
        assert_eq!(vocab.index_of("cat"), None);
    }

    #[test]
    fn test_set_count_unknown_word() {
        let mut vocab = Vocabulary::new();
        assert!(!vocab.set_count("missing", 4));
        assert!(vocab.set_count(END_OF_SENTENCE, 4));
        assert_eq!(vocab.entry(0).unwrap().count, 4);
    }

    #[test]
    fn test_sort_pins_end_of_sentence() {
        let mut vocab = build(&[("cat", 3), ("the", 100), ("dog", 2)]);
        vocab.set_count(END_OF_SENTENCE, 1);
        vocab.sort_by_frequency();

        assert_eq!(vocab.word(0), Some(END_OF_SENTENCE));
        assert_eq!(vocab.word(1), Some("the"));
        assert_eq!(vocab.word(2), Some("cat"));
        assert_eq!(vocab.word(3), Some("dog"));
        assert_eq!(vocab.entry(0).unwrap().count, 1);
        for i in 1..vocab.len() - 1 {
            assert!(vocab.entries()[i].count >= vocab.entries()[i + 1].count);
        }
        for (i, entry) in vocab.entries().iter().enumerate() {
            assert_eq!(vocab.index_of(&entry.word), Some(i));
        }
    }

    #[test]
    fn test_sort_is_idempotent() {
        let mut vocab = build(&[("a", 2), ("b", 5), ("c", 2), ("d", 5), ("e", 1)]);
        vocab.sort_by_frequency();
        let once = vocab.clone();
        vocab.sort_by_frequency();
        assert_eq!(vocab, once);
        // Ties keep insertion order.
        assert_eq!(vocab.word(1), Some("b"));
        assert_eq!(vocab.word(2), Some("d"));
        assert_eq!(vocab.word(3), Some("a"));
        assert_eq!(vocab.word(4), Some("c"));
    }

    #[test]
    fn test_prune_merges_into_unknown() {
        let mut vocab = build(&[("the", 10), ("rare", 1), ("odd", 2)]);
        let removed = vocab.prune(3);
        assert_eq!(removed, 2);
        assert_eq!(vocab.index_of("rare"), None);
        assert_eq!(vocab.index_of("odd"), None);
        let unk = vocab.index_of(UNKNOWN_WORD).unwrap();
        assert_eq!(vocab.entry(unk).unwrap().count, 3);
        assert_eq!(vocab.resolve("rare"), Some(unk));
        assert!(vocab.index_of(END_OF_SENTENCE).is_some());
    }

    #[test]
    fn test_prune_keeps_everything_at_floor_one() {
        let mut vocab = build(&[("the", 10), ("rare", 1)]);
        assert_eq!(vocab.prune(1), 0);
        assert_eq!(vocab.index_of(UNKNOWN_WORD), None);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut vocab = build(&[("the", 100), ("cat", 3), ("dog", 2)]);
        vocab.sort_by_frequency();
        for (i, entry) in vocab.entries_mut().iter_mut().enumerate() {
            entry.class_index = i / 2;
        }

        let mut buf = Vec::new();
        vocab.save(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Vocabulary:\n"));

        let loaded = Vocabulary::load(buf.as_slice(), vocab.len()).unwrap();
        assert_eq!(loaded, vocab);
        for entry in vocab.entries() {
            let i = loaded.index_of(&entry.word).unwrap();
            assert_eq!(loaded.entry(i).unwrap().count, entry.count);
            assert_eq!(loaded.class_of(i), entry.class_index);
        }
    }

    #[test]
    fn test_load_rejects_index_mismatch() {
        let data = "Vocabulary:\n0\t5\t</s>\t0\n2\t3\tcat\t1\n";
        let err = Vocabulary::load(data.as_bytes(), 2).unwrap_err();
        assert!(matches!(
            err,
            TreeLmError::IndexMismatch {
                expected: 1,
                found: 2
            }
        ));
    }

    #[test]
    fn test_load_rejects_truncated_input() {
        let data = "Vocabulary:\n0\t5\t</s>\t0\n";
        let err = Vocabulary::load(data.as_bytes(), 3).unwrap_err();
        assert!(matches!(err, TreeLmError::TruncatedVocabulary { .. }));
    }

    #[test]
    fn test_load_rejects_duplicate_word() {
        let data = "Vocabulary:\n0\t5\t</s>\t0\n1\t3\tcat\t0\n2\t2\tcat\t0\n";
        let err = Vocabulary::load(data.as_bytes(), 3).unwrap_err();
        assert!(matches!(err, TreeLmError::MalformedRecord { line: 4, .. }));
    }

    #[test]
    fn test_save_rejects_unstorable_words() {
        for word in ["New York", "", "tab\there"] {
            let mut vocab = build(&[("the", 4), (word, 2)]);
            vocab.sort_by_frequency();
            let mut buf = Vec::new();
            let err = vocab.save(&mut buf).unwrap_err();
            assert!(matches!(err, TreeLmError::MalformedRecord { line: 4, .. }));
            assert!(buf.is_empty());
        }
        assert!(is_valid_word("cat:nsubj"));
        assert!(!is_valid_word("New York"));
    }

    #[test]
    fn test_load_stops_at_expected_size() {
        let data = "Vocabulary:\n0\t5\t</s>\t0\n1\t3\tcat\t1\ntrailing model data\n";
        let vocab = Vocabulary::load(data.as_bytes(), 2).unwrap();
        assert_eq!(vocab.len(), 2);
    }
}
