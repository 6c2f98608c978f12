pub mod classes;
pub mod labels;
pub mod vocabulary;

pub use classes::{ClassAssignment, ClassPartition, WordClasses};
pub use labels::LabelVocabulary;
pub use vocabulary::{
    is_valid_word, VocabEntry, Vocabulary, END_OF_SENTENCE, START_OF_SENTENCE, UNKNOWN_WORD,
    VOCABULARY_HEADER,
};
