//! treelm command-line tool
//!
//! Trains a dependency-tree RNN language model from JSON Lines books and
//! scores held-out books with a saved model.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use treelm_core::{BookCorpus, DependencyLabelMode};
use treelm_trainer::{TrainerConfig, TreeLm};

/// CLI arguments
#[derive(Parser)]
#[command(name = "treelm")]
#[command(about = "Train and evaluate RNN language models over dependency trees")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Learn a vocabulary, train a model and save it
    Train {
        /// Training books (JSON Lines, one sentence per line)
        #[arg(long = "train", required = true, num_args = 1..)]
        train: Vec<PathBuf>,

        /// Validation books; the training books are used when absent
        #[arg(long = "valid", num_args = 1..)]
        valid: Vec<PathBuf>,

        /// Output model directory
        #[arg(short, long)]
        model: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// `word class` file for external classes
        #[arg(long)]
        class_file: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },
    /// Score books with a saved model
    Test {
        /// Model directory written by `train`
        #[arg(short, long)]
        model: PathBuf,

        /// Books to score
        #[arg(long = "test", required = true, num_args = 1..)]
        test: Vec<PathBuf>,

        /// Write per-token log-probabilities and hidden activations here
        #[arg(long)]
        features: Option<PathBuf>,
    },
}

/// Command-line overrides of configuration fields
#[derive(clap::Args)]
struct Overrides {
    /// Hidden layer size
    #[arg(long)]
    hidden: Option<usize>,

    /// Number of frequency-balanced classes
    #[arg(long)]
    classes: Option<usize>,

    /// Steps of back-propagation through time
    #[arg(long)]
    bptt: Option<usize>,

    /// Initial learning rate
    #[arg(long)]
    learning_rate: Option<f32>,

    /// L2 regularisation
    #[arg(long)]
    l2: Option<f32>,

    /// Maximum number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Words seen fewer times become <unk>
    #[arg(long)]
    min_count: Option<u64>,

    /// Hash size of the direct connections (0 disables them)
    #[arg(long)]
    direct_size: Option<usize>,

    /// History length of the direct connections
    #[arg(long)]
    direct_order: Option<usize>,

    /// Dependency labels: 0/ignore, 1/concatenate, 2/feature
    #[arg(long, value_parser = parse_label_mode)]
    label_mode: Option<DependencyLabelMode>,

    /// Keep labels of earlier nodes switched on along an unroll
    #[arg(long)]
    accumulate_labels: bool,

    /// Seed for weight initialisation
    #[arg(long)]
    seed: Option<u64>,
}

impl Overrides {
    fn apply(self, mut config: TrainerConfig) -> TrainerConfig {
        if let Some(v) = self.hidden {
            config.hidden_size = v;
        }
        if let Some(v) = self.classes {
            config.num_classes = v;
        }
        if let Some(v) = self.bptt {
            config.bptt = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.l2 {
            config.l2 = v;
        }
        if let Some(v) = self.epochs {
            config.max_epochs = v;
        }
        if let Some(v) = self.min_count {
            config.min_word_occurrence = v;
        }
        if let Some(v) = self.direct_size {
            config.direct_size = v;
        }
        if let Some(v) = self.direct_order {
            config.direct_order = v;
        }
        if let Some(v) = self.label_mode {
            config.label_mode = v;
        }
        if self.accumulate_labels {
            config.accumulate_labels = true;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        config
    }
}

fn parse_label_mode(value: &str) -> std::result::Result<DependencyLabelMode, String> {
    match value {
        "ignore" => Ok(DependencyLabelMode::Ignore),
        "concatenate" => Ok(DependencyLabelMode::Concatenate),
        "feature" => Ok(DependencyLabelMode::Feature),
        code => code
            .parse::<u8>()
            .map_err(|_| format!("unknown label mode {:?}", code))
            .and_then(|c| DependencyLabelMode::try_from(c).map_err(|e| e.to_string())),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Train {
            train,
            valid,
            model,
            config,
            class_file,
            overrides,
        } => {
            let mut base = match &config {
                Some(path) => TrainerConfig::from_path(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?,
                None => TrainerConfig::default(),
            };
            if let Some(path) = class_file {
                base.class_file = Some(path);
            }
            let config = overrides.apply(base);

            let train: BookCorpus = train.into_iter().collect();
            let valid: BookCorpus = valid.into_iter().collect();

            let mut lm = TreeLm::new(config).context("Invalid configuration")?;
            lm.learn_vocabulary(&train)
                .context("Failed to learn the vocabulary")?;
            lm.assign_classes().context("Failed to assign word classes")?;

            let summary = if valid.is_empty() {
                lm.train(&train, None)
            } else {
                lm.train(&train, Some(&valid))
            }
            .context("Training failed")?;
            info!(
                epochs = summary.epochs,
                perplexity = summary.best_valid.perplexity,
                learning_rate = summary.final_learning_rate,
                "training finished"
            );

            lm.save(&model)
                .with_context(|| format!("Failed to save model to {}", model.display()))?;
        }
        Commands::Test {
            model,
            test,
            features,
        } => {
            let mut lm = TreeLm::load(&model)
                .with_context(|| format!("Failed to load model from {}", model.display()))?;
            let corpus: BookCorpus = test.into_iter().collect();

            let evaluation = match features {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let mut sink = BufWriter::new(file);
                    let evaluation = lm.evaluate(&corpus, Some(&mut sink))?;
                    sink.flush()?;
                    evaluation
                }
                None => lm.evaluate(&corpus, None)?,
            };
            if evaluation.word_count == 0 {
                bail!("No in-vocabulary words to score");
            }

            for (i, score) in evaluation.sentence_scores.iter().enumerate() {
                println!("{}\t{:.6}", i, score);
            }
            println!("log10 probability: {:.4}", evaluation.log10_prob);
            println!("words: {}", evaluation.word_count);
            println!("perplexity: {:.4}", evaluation.perplexity);
        }
    }

    Ok(())
}
