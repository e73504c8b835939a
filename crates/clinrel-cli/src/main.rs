//! clinrel CLI - Command-line interface
//!
//! Usage:
//!   clinrel train --config c.toml --export export.json --output model/
//!   clinrel train --config c.toml --train-csv train.tsv --test-csv test.tsv
//!   clinrel evaluate --model model/ --test-csv test.tsv
//!   clinrel predict --model model/ --documents docs.json
//!   clinrel inspect --config c.toml --export export.json
//!   clinrel config
//!
//! Author: hephaex@gmail.com

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use clinrel_core::text::lowercase_in_place;
use clinrel_core::{
    AppConfig, ConceptTypes, Document, EmbeddingTableEncoder, HfTokenizer, LabelRegistry,
    LoggingConfig, Tokenizer, WordTokenizer,
};
use clinrel_extractor::delimited::read_rows;
use clinrel_extractor::{DatasetAssembler, TrainerExport, DEFAULT_SCHEMA_TAGS};
use clinrel_train::{RelationClassifier, TrainingSource, MODEL_CONFIG_FILE};

/// Word vocabulary written next to a saved model
const VOCAB_FILE: &str = "vocab.json";

#[derive(Parser)]
#[command(name = "clinrel")]
#[command(about = "Clinical relation extraction trainer")]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train (or resume training) a relation classifier
    Train {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        data: DataArgs,

        /// Directory to write the trained model to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Evaluate a saved model
    Evaluate {
        /// Saved model directory
        #[arg(short, long)]
        model: PathBuf,

        #[command(flatten)]
        data: DataArgs,
    },
    /// Predict relations for annotated documents
    Predict {
        /// Saved model directory
        #[arg(short, long)]
        model: PathBuf,

        /// JSON array of documents with entities
        #[arg(short, long)]
        documents: PathBuf,

        /// Write predictions here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print dataset statistics without training
    Inspect {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        data: DataArgs,
    },
    /// Print the default configuration as TOML
    Config,
}

#[derive(Args)]
struct DataArgs {
    /// Structured annotation export (JSON)
    #[arg(long)]
    export: Option<PathBuf>,

    /// Tab-separated training rows
    #[arg(long)]
    train_csv: Option<PathBuf>,

    /// Tab-separated test rows
    #[arg(long)]
    test_csv: Option<PathBuf>,

    /// JSON array of annotated documents
    #[arg(long)]
    documents: Option<PathBuf>,
}

impl DataArgs {
    fn source(&self) -> anyhow::Result<TrainingSource> {
        let mut source = TrainingSource::new();
        source.train_csv = self.train_csv.clone();
        source.test_csv = self.test_csv.clone();
        source.export_path = self.export.clone();
        if let Some(path) = &self.documents {
            source.documents = load_documents(path)?;
        }
        Ok(source)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            data,
            output,
        } => {
            let config = load_config(config.as_deref())?;
            init_logging(&config.logging, cli.verbose);
            train(config, &data, output.as_deref())
        }
        Commands::Evaluate { model, data } => {
            let config = AppConfig::from_file(model.join(MODEL_CONFIG_FILE))?;
            init_logging(&config.logging, cli.verbose);
            evaluate(&config, &model, &data)
        }
        Commands::Predict {
            model,
            documents,
            output,
        } => {
            let config = AppConfig::from_file(model.join(MODEL_CONFIG_FILE))?;
            init_logging(&config.logging, cli.verbose);
            predict(&config, &model, &documents, output.as_deref())
        }
        Commands::Inspect { config, data } => {
            let config = load_config(config.as_deref())?;
            init_logging(&config.logging, cli.verbose);
            inspect(&config, &data)
        }
        Commands::Config => {
            print!("{}", AppConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_documents(path: &Path) -> anyhow::Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read documents from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse documents in {}", path.display()))
}

fn load_concepts(config: &AppConfig) -> anyhow::Result<ConceptTypes> {
    match &config.general.concept_types_path {
        Some(path) => Ok(ConceptTypes::from_file(path)?),
        None => Ok(ConceptTypes::new()),
    }
}

/// Marker tokens the tokenizer must know
fn marker_tokens(config: &AppConfig) -> Vec<String> {
    if config.general.annotation_schema_tags.is_empty() {
        DEFAULT_SCHEMA_TAGS.iter().map(|t| t.to_string()).collect()
    } else {
        config.general.annotation_schema_tags.clone()
    }
}

/// Pretrained tokenizer or word vocabulary
enum LoadedTokenizer {
    Word(WordTokenizer),
    Pretrained(HfTokenizer),
}

impl LoadedTokenizer {
    /// Pretrained file if configured, else a saved vocabulary, else a fresh one from `corpus`
    fn load(config: &AppConfig, model_dir: Option<&Path>, corpus: &[String]) -> anyhow::Result<Self> {
        let markers = marker_tokens(config);
        if let Some(path) = &config.general.tokenizer_path {
            let tokenizer =
                HfTokenizer::from_file(path, config.general.max_seq_length, &markers)?;
            return Ok(Self::Pretrained(tokenizer));
        }

        if let Some(vocab) = model_dir.map(|dir| dir.join(VOCAB_FILE)) {
            if vocab.exists() {
                return Ok(Self::Word(WordTokenizer::from_file(&vocab)?));
            }
        }

        let texts: Vec<String> = corpus
            .iter()
            .map(|text| {
                if config.general.lowercase {
                    lowercase_in_place(text)
                } else {
                    text.clone()
                }
            })
            .collect();
        let mut tokenizer = WordTokenizer::from_corpus(
            texts.iter().map(String::as_str),
            config.general.max_seq_length,
        )?;
        tokenizer.add_special_tokens(&markers);
        tracing::info!(
            "Built word vocabulary of {} tokens from {} texts",
            tokenizer.vocab_size(),
            texts.len()
        );
        Ok(Self::Word(tokenizer))
    }

    fn as_dyn(&self) -> &dyn Tokenizer {
        match self {
            Self::Word(tokenizer) => tokenizer as &dyn Tokenizer,
            Self::Pretrained(tokenizer) => tokenizer as &dyn Tokenizer,
        }
    }

    fn save_vocab(&self, dir: &Path) -> anyhow::Result<()> {
        if let Self::Word(tokenizer) = self {
            tokenizer.save(dir.join(VOCAB_FILE))?;
        }
        Ok(())
    }
}

/// Every text a source would feed the tokenizer
fn corpus_texts(source: &TrainingSource) -> anyhow::Result<Vec<String>> {
    let mut texts = Vec::new();
    for path in source.train_csv.iter().chain(source.test_csv.iter()) {
        texts.extend(read_rows(path)?.into_iter().map(|row| row.sents));
    }
    if let Some(path) = &source.export_path {
        let export = TrainerExport::from_file(path)?;
        texts.extend(export.documents().map(|(_, doc)| doc.text.clone()));
    }
    texts.extend(source.documents.iter().map(|doc| doc.text.clone()));
    Ok(texts)
}

fn load_encoder(config: &AppConfig, tokenizer: &dyn Tokenizer) -> EmbeddingTableEncoder {
    EmbeddingTableEncoder::load_or_default(
        config.general.encoder_weights_path.as_deref(),
        tokenizer.vocab_size(),
        config.model.encoder_hidden_size,
        config.general.seed,
    )
}

// ============================================================================
// Commands
// ============================================================================

fn train(config: AppConfig, data: &DataArgs, output: Option<&Path>) -> anyhow::Result<()> {
    let source = data.source()?;
    let tokenizer = LoadedTokenizer::load(&config, None, &corpus_texts(&source)?)?;
    let encoder = load_encoder(&config, tokenizer.as_dyn());
    let concepts = load_concepts(&config)?;

    let mut classifier = RelationClassifier::new(config, tokenizer.as_dyn(), &encoder, concepts)?;
    let report = classifier.train(&source)?;

    println!(
        "Trained epochs {}..{} | best F1 {:.4}",
        report.start_epoch, report.epoch, report.best_f1
    );
    if let Some(summary) = &report.last_evaluation {
        println!("{}", serde_json::to_string_pretty(summary)?);
    }

    if let Some(output) = output {
        if classifier.load_best()? {
            tracing::info!("Saving best checkpoint (F1 {:.4})", classifier.best_f1());
        }
        classifier.save(output)?;
        tokenizer.save_vocab(output)?;
        println!("Model saved to {}", output.display());
    }
    Ok(())
}

fn evaluate(config: &AppConfig, model: &Path, data: &DataArgs) -> anyhow::Result<()> {
    let tokenizer = LoadedTokenizer::load(config, Some(model), &[])?;
    let encoder = load_encoder(config, tokenizer.as_dyn());
    let concepts = load_concepts(config)?;

    let mut classifier =
        RelationClassifier::load(model, tokenizer.as_dyn(), &encoder, concepts)?;
    let summary = classifier.evaluate(&data.source()?)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn predict(
    config: &AppConfig,
    model: &Path,
    documents: &Path,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let tokenizer = LoadedTokenizer::load(config, Some(model), &[])?;
    let encoder = load_encoder(config, tokenizer.as_dyn());
    let concepts = load_concepts(config)?;

    let classifier = RelationClassifier::load(model, tokenizer.as_dyn(), &encoder, concepts)?;
    let predictions = classifier.predict_documents(&load_documents(documents)?)?;
    let json = serde_json::to_string_pretty(&predictions)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Predictions written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn inspect(config: &AppConfig, data: &DataArgs) -> anyhow::Result<()> {
    let source = data.source()?;
    let tokenizer = LoadedTokenizer::load(config, None, &corpus_texts(&source)?)?;
    let concepts = load_concepts(config)?;
    let assembler = DatasetAssembler::new(tokenizer.as_dyn(), &config.general, &concepts)?;
    let mut registry: LabelRegistry = config.labels.clone();

    let dataset = if let Some(path) = source.train_csv.as_ref().or(source.test_csv.as_ref()) {
        assembler.from_delimited(path, &mut registry)?
    } else if let Some(path) = &source.export_path {
        assembler.from_export(&TrainerExport::from_file(path)?, &mut registry)
    } else if !source.documents.is_empty() {
        assembler.from_documents(&source.documents, &mut registry)
    } else {
        anyhow::bail!("No data provided: pass --export, --train-csv or --documents");
    };

    println!("records: {}", dataset.len());
    println!("classes: {}", dataset.class_count);
    for (label, count) in dataset.samples_per_class() {
        let index = registry
            .index_of(&label)
            .map(|i| i.to_string())
            .unwrap_or_default();
        println!("  [{index:>3}] {label}: {count}");
    }
    Ok(())
}
