//! Books of dependency-parsed sentences.
//!
//! A book is a JSON Lines file with one [`Sentence`] per line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::corpus::tree::Sentence;
use crate::error::{Result, TreeLmError};

/// The sentences of one book.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub sentences: Vec<Sentence>,
}

impl Document {
    pub fn new(sentences: Vec<Sentence>) -> Self {
        Self { sentences }
    }

    /// Parse JSON Lines, skipping blank lines.
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut sentences = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let sentence: Sentence =
                serde_json::from_str(line).map_err(|e| TreeLmError::MalformedRecord {
                    line: line_no + 1,
                    reason: e.to_string(),
                })?;
            sentences.push(sentence);
        }
        Ok(Self { sentences })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let document = Self::read(BufReader::new(file))?;
        debug!(
            path = %path.as_ref().display(),
            sentences = document.sentences.len(),
            "read book"
        );
        Ok(document)
    }

    /// Number of tokens over all sentences.
    pub fn num_tokens(&self) -> usize {
        self.sentences.iter().map(Sentence::len).sum()
    }
}

/// Anything that can hand over a list of documents.
pub trait CorpusSource {
    fn documents(&self) -> Result<Vec<Document>>;
}

/// Books read from disk on every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookCorpus {
    books: Vec<PathBuf>,
}

impl BookCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_book(&mut self, path: impl Into<PathBuf>) {
        self.books.push(path.into());
    }

    pub fn books(&self) -> &[PathBuf] {
        &self.books
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for BookCorpus {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self {
            books: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl CorpusSource for BookCorpus {
    fn documents(&self) -> Result<Vec<Document>> {
        self.books.iter().map(Document::from_path).collect()
    }
}

impl CorpusSource for Vec<Document> {
    fn documents(&self) -> Result<Vec<Document>> {
        Ok(self.clone())
    }
}

impl CorpusSource for Document {
    fn documents(&self) -> Result<Vec<Document>> {
        Ok(vec![self.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_jsonl() {
        let data = concat!(
            r#"{"tokens":[{"word":"dogs","head":2,"label":"nsubj"},{"word":"bark","head":0}]}"#,
            "\n\n",
            r#"{"tokens":[{"word":"yes","head":0}]}"#,
            "\n"
        );
        let doc = Document::read(data.as_bytes()).unwrap();
        assert_eq!(doc.sentences.len(), 2);
        assert_eq!(doc.num_tokens(), 3);
        assert_eq!(doc.sentences[0].tokens[0].word, "dogs");
    }

    #[test]
    fn test_read_reports_bad_line() {
        let data = "{\"tokens\":[]}\nnot json\n";
        let err = Document::read(data.as_bytes()).unwrap_err();
        assert!(matches!(err, TreeLmError::MalformedRecord { line: 2, .. }));
    }

    #[test]
    fn test_missing_book_is_io_error() {
        let corpus: BookCorpus = ["/nonexistent/treelm/book.jsonl"].into_iter().collect();
        assert!(matches!(corpus.documents(), Err(TreeLmError::Io(_))));
    }
}
