use thiserror::Error;

/// Errors that can occur while building vocabularies, assigning word
/// classes, reading dependency-tree corpora or training a model.
#[derive(Debug, Error)]
pub enum TreeLmError {
    /// A file could not be opened, read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON document (corpus sentence or model file) could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The start-of-sentence token appeared where it is reserved.
    #[error("reserved token {token:?} found on line {line}")]
    ReservedToken {
        /// The offending token.
        token: String,
        /// 1-based line number in the source.
        line: usize,
    },

    /// The end-of-sentence token is required but was not found.
    #[error("end-of-sentence token {0:?} is missing")]
    MissingEndOfSentence(String),

    /// A class file contained no `word class` pairs.
    #[error("class file is empty")]
    EmptyClassFile,

    /// A line of a class file or vocabulary record could not be parsed.
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord {
        /// 1-based line number in the source.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },

    /// A serialized vocabulary declared an index out of scan order.
    #[error("vocabulary index mismatch: expected {expected}, found {found}")]
    IndexMismatch {
        /// The scan position.
        expected: usize,
        /// The index declared in the record.
        found: usize,
    },

    /// A serialized vocabulary ended before the declared number of words.
    #[error("vocabulary truncated: expected {expected} words, read {read}")]
    TruncatedVocabulary {
        /// Declared vocabulary size.
        expected: usize,
        /// Number of records actually read.
        read: usize,
    },

    /// Class assignment produced a class without members.
    #[error("word class {0} has no members; too many classes for this vocabulary")]
    EmptyClass(usize),

    /// External-class mode found a vocabulary word absent from the class file.
    #[error("word {0:?} has no class in the class file")]
    UnclassifiedWord(String),

    /// The corpus contained no countable tokens.
    #[error("corpus is empty")]
    EmptyCorpus,

    /// A dependency tree could not be unrolled.
    #[error("malformed dependency tree in sentence {sentence}: {reason}")]
    MalformedTree {
        /// 0-based sentence index in its book.
        sentence: usize,
        /// What was wrong with the tree.
        reason: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation was requested in the wrong training phase.
    #[error("cannot {operation} while {phase}")]
    InvalidPhase {
        /// The attempted operation.
        operation: &'static str,
        /// The current phase.
        phase: String,
    },
}

/// Result type alias for treelm operations.
pub type Result<T> = std::result::Result<T, TreeLmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = TreeLmError::IndexMismatch {
            expected: 3,
            found: 7,
        };
        assert_eq!(
            err.to_string(),
            "vocabulary index mismatch: expected 3, found 7"
        );

        let err = TreeLmError::ReservedToken {
            token: "<s>".into(),
            line: 4,
        };
        assert!(err.to_string().contains("<s>"));
        assert!(err.to_string().contains("line 4"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TreeLmError>();
    }
}
