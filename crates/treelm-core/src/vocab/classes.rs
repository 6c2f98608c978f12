//! # Word Classes for the Hierarchical Softmax
//!
//! Partitions the vocabulary into output classes so that a word's
//! probability factorises into P(class | context) * P(word | class, context).
//! Classes come either from an external `word class` file or from the
//! frequency-mass balancing rule, which gives every class roughly the same
//! share of square-root-scaled unigram mass.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Result, TreeLmError};
use crate::vocab::vocabulary::{Vocabulary, END_OF_SENTENCE, START_OF_SENTENCE};

/// Word classes read from a `word class` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordClasses {
    classes: HashMap<String, usize>,
    distinct: BTreeSet<usize>,
}

impl WordClasses {
    /// Read a class file from disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let classes = Self::read(BufReader::new(file))?;
        info!(
            path = %path.as_ref().display(),
            words = classes.len(),
            classes = classes.num_classes(),
            "read word classes"
        );
        Ok(classes)
    }

    /// Parse whitespace-separated `word class` pairs, one per line.
    ///
    /// Fails if `<s>` appears, if `</s>` is absent, or if there are no
    /// pairs at all. On success `</s>` carries the highest class id: its
    /// original class and the highest class swap ids.
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut classes = HashMap::new();
        let mut distinct = BTreeSet::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = line_no + 1;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() != 2 {
                return Err(TreeLmError::MalformedRecord {
                    line: line_no,
                    reason: format!("expected `word class`, found {} columns", fields.len()),
                });
            }

            let word = fields[0];
            if word == START_OF_SENTENCE {
                return Err(TreeLmError::ReservedToken {
                    token: word.to_string(),
                    line: line_no,
                });
            }
            let class: usize = fields[1].parse().map_err(|_| TreeLmError::MalformedRecord {
                line: line_no,
                reason: format!("invalid class id {:?}", fields[1]),
            })?;

            classes.insert(word.to_string(), class);
            distinct.insert(class);
        }

        if classes.is_empty() {
            return Err(TreeLmError::EmptyClassFile);
        }
        let eos_class = *classes
            .get(END_OF_SENTENCE)
            .ok_or_else(|| TreeLmError::MissingEndOfSentence(END_OF_SENTENCE.into()))?;
        let max_class = distinct.iter().next_back().copied().unwrap_or(eos_class);

        if eos_class != max_class {
            for class in classes.values_mut() {
                if *class == eos_class {
                    *class = max_class;
                } else if *class == max_class {
                    *class = eos_class;
                }
            }
            debug!(eos_class, max_class, "swapped end-of-sentence class to the top");
        }

        Ok(Self { classes, distinct })
    }

    pub fn class_of(&self, word: &str) -> Option<usize> {
        self.classes.get(word).copied()
    }

    /// Number of words in the file.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Number of distinct class ids.
    pub fn num_classes(&self) -> usize {
        self.distinct.len()
    }

    /// Highest class id in the file.
    pub fn max_class(&self) -> Option<usize> {
        self.distinct.iter().next_back().copied()
    }

    /// Attach the file's class ids to every vocabulary word.
    pub fn apply(&self, vocab: &mut Vocabulary) -> Result<()> {
        for entry in vocab.entries_mut() {
            entry.class_index = self
                .class_of(&entry.word)
                .ok_or_else(|| TreeLmError::UnclassifiedWord(entry.word.clone()))?;
        }
        Ok(())
    }
}

/// How vocabulary words are mapped to output classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassAssignment {
    /// Classes already attached to the words (class file or loaded model)
    /// are compacted into a dense `0..n` range.
    External,
    /// Classes of roughly equal square-root frequency mass.
    FrequencyBalanced {
        /// Requested number of classes.
        num_classes: usize,
    },
}

impl ClassAssignment {
    /// Assign every vocabulary word a class and return the partition.
    ///
    /// Fails with [`TreeLmError::EmptyClass`] if any class ends up empty.
    pub fn assign(&self, vocab: &mut Vocabulary) -> Result<ClassPartition> {
        let num_classes = match *self {
            ClassAssignment::External => compact_external_classes(vocab),
            ClassAssignment::FrequencyBalanced { num_classes } => {
                balance_frequency_mass(vocab, num_classes)?;
                num_classes
            }
        };
        let partition = ClassPartition::from_vocabulary(vocab, num_classes)?;
        info!(
            mode = ?self,
            classes = partition.num_classes(),
            words = vocab.len(),
            "assigned words to classes"
        );
        Ok(partition)
    }
}

/// Renumber class ids in index order, advancing the counter every time the
/// id differs from the previous word's. Same-class words must already be
/// contiguous. Returns the number of classes.
fn compact_external_classes(vocab: &mut Vocabulary) -> usize {
    let mut current = 0usize;
    let mut last: Option<usize> = None;
    for entry in vocab.entries_mut() {
        if let Some(previous) = last {
            if previous != entry.class_index {
                current += 1;
            }
        }
        last = Some(entry.class_index);
        entry.class_index = current;
        entry.prob = 0.0;
    }
    if last.is_some() {
        current + 1
    } else {
        0
    }
}

/// Walk the vocabulary in index order accumulating
/// `sqrt(count / total) / Z` and move to the next class whenever the
/// running mass passes `(class + 1) / num_classes`.
///
/// The class pointer saturates at `num_classes - 1`: mass left over once
/// the last class is reached all lands in that class. If the walk runs out
/// of words before reaching some class, that class stays empty and the
/// partition check reports it.
fn balance_frequency_mass(vocab: &mut Vocabulary, num_classes: usize) -> Result<()> {
    if num_classes == 0 {
        return Err(TreeLmError::InvalidConfig(
            "number of classes must be at least 1".into(),
        ));
    }
    let total = vocab.total_count();
    if total == 0 {
        return Err(TreeLmError::EmptyCorpus);
    }
    let total = total as f64;
    let norm: f64 = vocab
        .entries()
        .iter()
        .map(|e| (e.count as f64 / total).sqrt())
        .sum();

    let mut cumulative = 0.0f64;
    let mut class = 0usize;
    for entry in vocab.entries_mut() {
        cumulative = (cumulative + (entry.count as f64 / total).sqrt() / norm).min(1.0);
        entry.class_index = class;
        entry.prob = 0.0;
        if cumulative > (class + 1) as f64 / num_classes as f64 && class < num_classes - 1 {
            class += 1;
        }
    }
    Ok(())
}

/// Vocabulary indices grouped by class id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassPartition {
    members: Vec<Vec<usize>>,
}

impl ClassPartition {
    /// Group the vocabulary by the class ids currently attached to it.
    pub fn from_vocabulary(vocab: &Vocabulary, num_classes: usize) -> Result<Self> {
        let mut members = vec![Vec::new(); num_classes];
        for (i, entry) in vocab.entries().iter().enumerate() {
            let class = entry.class_index;
            if class >= num_classes {
                return Err(TreeLmError::InvalidConfig(format!(
                    "word {:?} has class {} but only {} classes exist",
                    entry.word, class, num_classes
                )));
            }
            members[class].push(i);
        }
        if let Some(empty) = members.iter().position(|m| m.is_empty()) {
            return Err(TreeLmError::EmptyClass(empty));
        }
        Ok(Self { members })
    }

    pub fn num_classes(&self) -> usize {
        self.members.len()
    }

    /// Vocabulary indices belonging to `class`, in index order.
    pub fn members(&self, class: usize) -> &[usize] {
        &self.members[class]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.members.iter().map(|m| m.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::vocabulary::UNKNOWN_WORD;

    fn vocab_from(words: &[(&str, u64)]) -> Vocabulary {
        let mut vocab = Vocabulary::new();
        for &(word, count) in words {
            vocab.add_or_increment(word);
            vocab.set_count(word, count);
        }
        vocab.sort_by_frequency();
        vocab
    }

    #[test]
    fn test_balanced_small_scenario() {
        let mut vocab = vocab_from(&[(END_OF_SENTENCE, 5), ("the", 100), ("cat", 3), ("dog", 2)]);
        assert_eq!(vocab.total_count(), 110);

        let partition = ClassAssignment::FrequencyBalanced { num_classes: 2 }
            .assign(&mut vocab)
            .unwrap();

        let the = vocab.index_of("the").unwrap();
        let cat = vocab.index_of("cat").unwrap();
        let dog = vocab.index_of("dog").unwrap();
        assert_eq!(vocab.class_of(0), 0);
        assert_eq!(vocab.class_of(the), 0);
        assert_eq!(vocab.class_of(cat), 1);
        assert_eq!(vocab.class_of(dog), 1);
        assert_eq!(partition.members(0), &[0, the]);
        assert_eq!(partition.members(1), &[cat, dog]);
        assert!(vocab.entries().iter().all(|e| e.prob == 0.0));
    }

    #[test]
    fn test_balanced_single_class() {
        let mut vocab = vocab_from(&[("a", 4), ("b", 3), ("c", 1)]);
        vocab.set_count(END_OF_SENTENCE, 2);
        let partition = ClassAssignment::FrequencyBalanced { num_classes: 1 }
            .assign(&mut vocab)
            .unwrap();
        assert_eq!(partition.num_classes(), 1);
        assert_eq!(partition.members(0).len(), vocab.len());
    }

    #[test]
    fn test_balanced_randomized_properties() {
        let mut rng = oorandom::Rand64::new(7);
        for _ in 0..25 {
            let size = rng.rand_range(50..400) as usize;
            let mut vocab = Vocabulary::new();
            for w in 0..size {
                let word = format!("w{}", w);
                vocab.add_or_increment(&word);
                vocab.set_count(&word, rng.rand_range(1..1000));
            }
            vocab.set_count(END_OF_SENTENCE, rng.rand_range(1..1000));
            vocab.sort_by_frequency();

            let num_classes = rng.rand_range(1..(size as u64 / 5)) as usize;
            let partition = ClassAssignment::FrequencyBalanced { num_classes }
                .assign(&mut vocab)
                .unwrap();

            assert_eq!(partition.num_classes(), num_classes);
            let mut mass = 0u64;
            for (class, members) in partition.iter().enumerate() {
                assert!(!members.is_empty());
                for &i in members {
                    assert_eq!(vocab.class_of(i), class);
                    mass += vocab.entry(i).unwrap().count;
                }
            }
            assert_eq!(mass, vocab.total_count());
            assert!(vocab.entries().iter().all(|e| e.class_index < num_classes));
        }
    }

    #[test]
    fn test_too_many_classes_is_fatal() {
        let mut vocab = vocab_from(&[(END_OF_SENTENCE, 5), ("the", 100), ("cat", 3)]);
        let err = ClassAssignment::FrequencyBalanced { num_classes: 10 }
            .assign(&mut vocab)
            .unwrap_err();
        assert!(matches!(err, TreeLmError::EmptyClass(_)));
    }

    #[test]
    fn test_zero_classes_rejected() {
        let mut vocab = vocab_from(&[("the", 100)]);
        let err = ClassAssignment::FrequencyBalanced { num_classes: 0 }
            .assign(&mut vocab)
            .unwrap_err();
        assert!(matches!(err, TreeLmError::InvalidConfig(_)));
    }

    #[test]
    fn test_empty_corpus_rejected() {
        let mut vocab = Vocabulary::new();
        let err = ClassAssignment::FrequencyBalanced { num_classes: 1 }
            .assign(&mut vocab)
            .unwrap_err();
        assert!(matches!(err, TreeLmError::EmptyCorpus));
    }

    #[test]
    fn test_read_classes_swaps_end_of_sentence_to_max() {
        let data = "the\t0\n</s>\t1\ncat\t4\ndog 4\nran\t2\n";
        let classes = WordClasses::read(data.as_bytes()).unwrap();
        assert_eq!(classes.len(), 5);
        assert_eq!(classes.num_classes(), 4);
        assert_eq!(classes.class_of(END_OF_SENTENCE), Some(4));
        assert_eq!(classes.class_of("cat"), Some(1));
        assert_eq!(classes.class_of("dog"), Some(1));
        assert_eq!(classes.class_of("the"), Some(0));
        assert_eq!(classes.class_of("ran"), Some(2));
        assert_eq!(classes.max_class(), Some(4));
    }

    #[test]
    fn test_read_classes_rejects_start_token() {
        let data = "</s>\t0\n<s>\t1\n";
        let err = WordClasses::read(data.as_bytes()).unwrap_err();
        assert!(matches!(err, TreeLmError::ReservedToken { line: 2, .. }));
    }

    #[test]
    fn test_read_classes_requires_end_of_sentence() {
        let err = WordClasses::read("the\t0\ncat\t1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, TreeLmError::MissingEndOfSentence(_)));
    }

    #[test]
    fn test_read_classes_rejects_empty_file() {
        let err = WordClasses::read("\n\n".as_bytes()).unwrap_err();
        assert!(matches!(err, TreeLmError::EmptyClassFile));
    }

    #[test]
    fn test_external_classes_compaction() {
        let data = "</s>\t3\nthe\t0\na\t0\ncat\t7\ndog\t7\n<unk>\t3\n";
        let classes = WordClasses::read(data.as_bytes()).unwrap();

        let mut vocab = vocab_from(&[
            ("the", 50),
            ("a", 40),
            ("cat", 5),
            ("dog", 3),
            (UNKNOWN_WORD, 2),
        ]);
        vocab.set_count(END_OF_SENTENCE, 10);
        classes.apply(&mut vocab).unwrap();
        vocab.sort_by_class();

        let partition = ClassAssignment::External.assign(&mut vocab).unwrap();
        assert_eq!(partition.num_classes(), 3);
        assert_eq!(vocab.word(0), Some(END_OF_SENTENCE));
        assert_eq!(vocab.class_of(0), 0);

        let class_of = |w: &str| vocab.class_of(vocab.index_of(w).unwrap());
        assert_eq!(class_of(UNKNOWN_WORD), class_of(END_OF_SENTENCE));
        assert_eq!(class_of("dog"), class_of("cat"));
        assert_eq!(class_of("the"), class_of("a"));
        assert_ne!(class_of("the"), class_of("cat"));
        assert_ne!(class_of(UNKNOWN_WORD), class_of("the"));
        for (i, entry) in vocab.entries().iter().enumerate().skip(1) {
            assert!(entry.class_index >= vocab.class_of(i - 1));
        }
    }

    #[test]
    fn test_apply_rejects_unclassified_word() {
        let classes = WordClasses::read("</s>\t0\nthe\t1\n".as_bytes()).unwrap();
        let mut vocab = vocab_from(&[("the", 3), ("cat", 1)]);
        let err = classes.apply(&mut vocab).unwrap_err();
        assert!(matches!(err, TreeLmError::UnclassifiedWord(w) if w == "cat"));
    }
}
