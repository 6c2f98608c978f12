//! Model directories: `model.json` holds the configuration, layer sizes,
//! label vocabulary and weights; `vocab.txt` holds the vocabulary records.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use treelm_core::vocab::END_OF_SENTENCE;
use treelm_core::{ClassPartition, LabelVocabulary, Result, TreeLmError, Vocabulary};

use crate::config::TrainerConfig;
use crate::model::{ModelDims, RnnModel, Weights};

pub const MODEL_FILE: &str = "model.json";
pub const VOCAB_FILE: &str = "vocab.txt";

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ModelFile {
    format_version: u32,
    config: TrainerConfig,
    dims: ModelDims,
    labels: LabelVocabulary,
    weights: Weights,
}

/// Everything needed to resume evaluation.
pub struct SavedModel {
    pub config: TrainerConfig,
    pub vocab: Vocabulary,
    pub labels: LabelVocabulary,
    pub model: RnnModel,
}

pub fn save(
    dir: &Path,
    config: &TrainerConfig,
    vocab: &Vocabulary,
    labels: &LabelVocabulary,
    model: &RnnModel,
) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let mut writer = BufWriter::new(File::create(dir.join(VOCAB_FILE))?);
    vocab.save(&mut writer)?;
    writer.flush()?;

    let file = ModelFile {
        format_version: FORMAT_VERSION,
        config: config.clone(),
        dims: *model.dims(),
        labels: labels.clone(),
        weights: model.weights().clone(),
    };
    let mut writer = BufWriter::new(File::create(dir.join(MODEL_FILE))?);
    serde_json::to_writer(&mut writer, &file)?;
    writer.flush()?;

    info!(dir = %dir.display(), words = vocab.len(), "model saved");
    Ok(())
}

pub fn load(dir: &Path) -> Result<SavedModel> {
    let reader = BufReader::new(File::open(dir.join(MODEL_FILE))?);
    let file: ModelFile = serde_json::from_reader(reader)?;
    if file.format_version != FORMAT_VERSION {
        return Err(TreeLmError::InvalidConfig(format!(
            "unsupported model format version {}",
            file.format_version
        )));
    }
    file.config.validate()?;
    file.dims.validate()?;

    let reader = BufReader::new(File::open(dir.join(VOCAB_FILE))?);
    let vocab = Vocabulary::load(reader, file.dims.vocab_size)?;
    // Every unroll starts from index 0.
    if vocab.word(0) != Some(END_OF_SENTENCE) {
        return Err(TreeLmError::InvalidConfig(format!(
            "vocabulary must start with {}",
            END_OF_SENTENCE
        )));
    }
    let partition = ClassPartition::from_vocabulary(&vocab, file.dims.num_classes)?;
    let model = RnnModel::from_parts(file.dims, file.weights, &vocab, partition)?;

    info!(dir = %dir.display(), words = vocab.len(), "model loaded");
    Ok(SavedModel {
        config: file.config,
        vocab,
        labels: file.labels,
        model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use treelm_core::ClassAssignment;

    fn saved_model(name: &str) -> std::path::PathBuf {
        let mut vocab = Vocabulary::new();
        for word in ["cat", "cat", "dog"] {
            vocab.add_or_increment(word);
        }
        vocab.set_count(END_OF_SENTENCE, 2);
        vocab.sort_by_frequency();
        let partition = ClassAssignment::FrequencyBalanced { num_classes: 1 }
            .assign(&mut vocab)
            .unwrap();
        let dims = ModelDims {
            vocab_size: vocab.len(),
            hidden_size: 3,
            num_classes: 1,
            num_labels: 0,
            direct_size: 8,
            direct_order: 2,
            bptt: 1,
        };
        let model = RnnModel::new(dims, &vocab, partition, 7).unwrap();

        let dir = std::env::temp_dir().join(format!("treelm-{}-{}", name, std::process::id()));
        let config = TrainerConfig::new().with_direct_connections(8, 2);
        save(&dir, &config, &vocab, &LabelVocabulary::new(), &model).unwrap();
        dir
    }

    fn edit_model_file(dir: &Path, edit: impl FnOnce(&mut serde_json::Value)) {
        let path = dir.join(MODEL_FILE);
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        edit(&mut value);
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
    }

    #[test]
    fn test_roundtrip() {
        let dir = saved_model("persist-roundtrip");
        let loaded = load(&dir).unwrap();
        assert_eq!(loaded.vocab.word(0), Some(END_OF_SENTENCE));
        assert_eq!(loaded.model.dims().direct_size, 8);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_rejects_single_hash_slot() {
        let dir = saved_model("persist-direct");
        edit_model_file(&dir, |value| {
            value["dims"]["direct_size"] = 1.into();
            value["weights"]["direct"] = serde_json::json!([0.0]);
        });
        let err = load(&dir).err().unwrap();
        assert!(matches!(err, TreeLmError::InvalidConfig(_)));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let dir = saved_model("persist-config");
        edit_model_file(&dir, |value| {
            value["config"]["hidden_size"] = 0.into();
        });
        assert!(load(&dir).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_requires_end_of_sentence_first() {
        let dir = saved_model("persist-eos");
        std::fs::write(
            dir.join(VOCAB_FILE),
            "Vocabulary:\n0\t2\tcat\t0\n1\t2\t</s>\t0\n2\t1\tdog\t0\n",
        )
        .unwrap();
        let err = load(&dir).err().unwrap();
        assert!(matches!(err, TreeLmError::InvalidConfig(_)));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
