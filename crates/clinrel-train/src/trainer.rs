//! Training and evaluation loop
//!
//! [`RelationClassifier`] owns the configuration (label registry included),
//! the classification head and its optimizer state. The encoder and the
//! tokenizer are borrowed and never updated.
//!
//! Each epoch runs the training batches, evaluates the test set, writes the
//! best checkpoint when test F1 improved and always writes the periodic
//! checkpoint plus the results history. A fresh classifier pointed at the
//! same checkpoint directory resumes from the stored epoch.
//!
//! Author: hephaex@gmail.com

use std::path::{Path, PathBuf};

use candle_core::Tensor;
use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use clinrel_core::{
    AppConfig, ClinrelError, ConceptTypes, Document, GeneralConfig, LabelRegistry, Result,
    TextEncoder, Tokenizer, TrainConfig,
};
use clinrel_extractor::{
    evaluate, DatasetAssembler, EvaluationSummary, MetricsAccumulator, RelationDataset,
    SchemaTags, TrainerExport,
};

use crate::checkpoint::{
    read_json, write_json, CheckpointKind, CheckpointStore, TrainingHistory, TrainingState,
};
use crate::collate::{Batch, BatchCollator};
use crate::head::{
    argmax_rows, cross_entropy, entity_features, features_tensor, scalar, HeadGradients,
    RelationHead,
};
use crate::optim::{clip_grad_norm, Adam, MultiStepLr};

/// Configuration file inside a saved model directory
pub const MODEL_CONFIG_FILE: &str = "config.toml";

/// Weights file inside a saved model directory
pub const MODEL_WEIGHTS_FILE: &str = "model.json";

// ============================================================================
// Data Sources
// ============================================================================

/// Where training or evaluation records come from
///
/// Delimited files win over an export, an export wins over documents.
#[derive(Debug, Clone, Default)]
pub struct TrainingSource {
    pub train_csv: Option<PathBuf>,
    pub test_csv: Option<PathBuf>,
    pub export_path: Option<PathBuf>,
    pub documents: Vec<Document>,
}

impl TrainingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_csv(mut self, train: impl Into<PathBuf>, test: Option<PathBuf>) -> Self {
        self.train_csv = Some(train.into());
        self.test_csv = test;
        self
    }

    pub fn with_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = Some(path.into());
        self
    }

    pub fn with_documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = documents;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.train_csv.is_none()
            && self.test_csv.is_none()
            && self.export_path.is_none()
            && self.documents.is_empty()
    }
}

fn no_data_error() -> ClinrelError {
    ClinrelError::Config(
        "No training data provided: pass a delimited file, an export or documents".to_string(),
    )
}

/// Assemble one dataset from the first available source
fn assemble_dataset(
    assembler: &DatasetAssembler<'_>,
    source: &TrainingSource,
    registry: &mut LabelRegistry,
) -> Result<RelationDataset> {
    if let Some(path) = source.train_csv.as_ref().or(source.test_csv.as_ref()) {
        return assembler.from_delimited(path, registry);
    }
    if let Some(path) = &source.export_path {
        let export = TrainerExport::from_file(path)?;
        return Ok(assembler.from_export(&export, registry));
    }
    if !source.documents.is_empty() {
        return Ok(assembler.from_documents(&source.documents, registry));
    }
    Err(no_data_error())
}

/// Train and test datasets for one run
fn assemble_train_test(
    tokenizer: &dyn Tokenizer,
    general: &GeneralConfig,
    train_config: &TrainConfig,
    concepts: &ConceptTypes,
    registry: &mut LabelRegistry,
    source: &TrainingSource,
) -> Result<(RelationDataset, RelationDataset)> {
    if source.is_empty() {
        return Err(no_data_error());
    }
    let assembler = DatasetAssembler::new(tokenizer, general, concepts)?;
    let isolated = train_config.isolated_test_labels;

    if let (Some(train_csv), Some(test_csv)) = (&source.train_csv, &source.test_csv) {
        let train = assembler.from_delimited(train_csv, registry)?;
        let test = if isolated {
            assembler.from_delimited(test_csv, &mut LabelRegistry::new())?
        } else {
            assembler.from_delimited(test_csv, registry)?
        };
        return Ok((train, test));
    }

    let dataset = assemble_dataset(&assembler, source, registry)?;
    Ok(dataset.split(train_config.test_size, isolated))
}

// ============================================================================
// Relation Classifier
// ============================================================================

/// Outcome of one [`RelationClassifier::train`] call
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// Completed epochs before this run
    pub start_epoch: usize,
    /// Completed epochs after this run
    pub epoch: usize,
    pub best_f1: f32,
    pub history: TrainingHistory,
    pub last_evaluation: Option<EvaluationSummary>,
}

/// Relation classifier: frozen encoder plus trainable head
pub struct RelationClassifier<'a> {
    pub(crate) config: AppConfig,
    pub(crate) tokenizer: &'a dyn Tokenizer,
    pub(crate) encoder: &'a dyn TextEncoder,
    pub(crate) concepts: ConceptTypes,
    pub(crate) head: RelationHead,
    optimizer: Adam,
    scheduler: MultiStepLr,
    epoch: usize,
    best_f1: f32,
    rng: ChaCha8Rng,
}

impl<'a> RelationClassifier<'a> {
    pub fn new(
        config: AppConfig,
        tokenizer: &'a dyn Tokenizer,
        encoder: &'a dyn TextEncoder,
        concepts: ConceptTypes,
    ) -> Result<Self> {
        config.validate()?;

        let nclasses = config.model.nclasses.max(config.labels.output_width());
        let head = RelationHead::new(
            3 * encoder.hidden_size(),
            config.model.hidden_size,
            nclasses,
            config.model.dropout,
            config.general.seed,
        )?;
        let optimizer = Adam::new(&head)?;
        let scheduler = MultiStepLr::new(
            config.train.lr,
            config.train.multistep_milestones.clone(),
            config.train.multistep_lr_gamma,
        );
        let rng = ChaCha8Rng::seed_from_u64(config.general.seed);

        let mut classifier = Self {
            config,
            tokenizer,
            encoder,
            concepts,
            head,
            optimizer,
            scheduler,
            epoch: 0,
            best_f1: 0.0,
            rng,
        };
        classifier.config.model.nclasses = nclasses;
        Ok(classifier)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn labels(&self) -> &LabelRegistry {
        &self.config.labels
    }

    pub fn head(&self) -> &RelationHead {
        &self.head
    }

    /// Completed epochs
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn best_f1(&self) -> f32 {
        self.best_f1
    }

    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(
            &self.config.train.checkpoint_dir,
            &self.config.general.task,
            &self.config.general.model_name,
        )
    }

    /// Optimizer updates applied so far, restored runs included
    pub fn optimizer_steps(&self) -> u64 {
        self.optimizer.steps()
    }

    /// Snapshot of the trainable state
    pub fn state(&self) -> Result<TrainingState> {
        Ok(TrainingState {
            epoch: self.epoch,
            best_f1: self.best_f1,
            head: self.head.state()?,
            optimizer: self.optimizer.state()?,
            scheduler: self.scheduler.clone(),
            saved_at: Utc::now(),
        })
    }

    /// Replace the trainable state with a stored one
    pub fn restore(&mut self, state: TrainingState) -> Result<()> {
        let expected = 3 * self.encoder.hidden_size();
        if state.head.input_dim() != expected {
            return Err(ClinrelError::Checkpoint(format!(
                "Stored head takes {} features but the encoder produces {}",
                state.head.input_dim(),
                expected
            )));
        }
        let device = self.head.device().clone();
        self.head = RelationHead::from_state(&state.head, &device)?;
        self.optimizer = Adam::from_state(&state.optimizer, &device)?;
        self.optimizer.sync_with(&self.head)?;
        self.epoch = state.epoch;
        self.best_f1 = state.best_f1;
        self.scheduler = state.scheduler;
        self.config.model.nclasses = self.head.nclasses();
        Ok(())
    }

    /// Swap in the best checkpoint, if one was written
    pub fn load_best(&mut self) -> Result<bool> {
        match self.checkpoint_store().load(CheckpointKind::Best)? {
            Some(state) => {
                self.restore(state)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Grow the output layer so every class index fits
    pub fn ensure_classes(&mut self, nclasses: usize) -> Result<()> {
        let seed = self.config.general.seed.wrapping_add(self.epoch as u64 + 1);
        if self.head.resize_output(nclasses, seed)? {
            self.optimizer.sync_with(&self.head)?;
            self.config.model.nclasses = self.head.nclasses();
        }
        Ok(())
    }

    pub(crate) fn tag_ids(&self) -> Result<Option<[u32; 4]>> {
        let tags = SchemaTags::resolve(
            self.config.general.annotation_schema_tags.as_slice(),
            self.tokenizer,
        )?;
        Ok(tags.map(|tags| tags.ids))
    }

    pub(crate) fn features(&self, batch: &Batch, tag_ids: Option<[u32; 4]>) -> Result<Tensor> {
        let output = self.encoder.encode(
            &batch.token_ids,
            &batch.attention_mask,
            &batch.token_type_ids(),
        )?;
        features_tensor(&entity_features(&output, batch, tag_ids), self.head.device())
    }

    pub(crate) fn collator(&self) -> BatchCollator {
        BatchCollator::new(self.tokenizer.pad_id())
    }

    // ------------------------------------------------------------------------
    // Training
    // ------------------------------------------------------------------------

    /// Train for `train.nepochs` more epochs
    pub fn train(&mut self, source: &TrainingSource) -> Result<TrainingReport> {
        let (mut train, mut test) = assemble_train_test(
            self.tokenizer,
            &self.config.general,
            &self.config.train,
            &self.concepts,
            &mut self.config.labels,
            source,
        )?;
        train.refresh(&self.config.labels);
        if !self.config.train.isolated_test_labels {
            test.refresh(&self.config.labels);
        }
        train.log_summary("Train");
        test.log_summary("Test");

        let store = self.checkpoint_store();
        if let Some(state) = store.load(CheckpointKind::Periodic)? {
            self.restore(state)?;
        }
        self.ensure_classes(
            self.config
                .labels
                .output_width()
                .max(test.class_count)
                .max(self.config.model.nclasses),
        )?;

        let mut history = store.load_history()?;
        let start_epoch = self.epoch;
        let end_epoch = start_epoch + self.config.train.nepochs;
        let mut last_evaluation = None;

        tracing::info!(
            "Starting training | epochs {}..{} | {} train / {} test records | {} classes",
            start_epoch,
            end_epoch,
            train.len(),
            test.len(),
            self.head.nclasses()
        );

        for epoch in start_epoch..end_epoch {
            let started = Utc::now();
            let (loss, accuracy) = self.train_epoch(&train, epoch)?;
            tracing::info!("Epoch {} | loss {:.5} | train accuracy {:.5}", epoch, loss, accuracy);

            let results = self.evaluate_results(&test)?;
            self.epoch += 1;
            history.record(epoch, loss, accuracy, results.f1);

            if results.f1 > self.best_f1 {
                self.best_f1 = results.f1;
                store.save(&self.state()?, CheckpointKind::Best)?;
            }
            store.save_history(&history)?;
            store.save(&self.state()?, CheckpointKind::Periodic)?;

            tracing::info!(
                "Epoch {} finished in {}s | test F1 {:.4} | best F1 {:.4}",
                epoch,
                (Utc::now() - started).num_seconds(),
                results.f1,
                self.best_f1
            );
            last_evaluation = Some(results);
        }

        Ok(TrainingReport {
            start_epoch,
            epoch: self.epoch,
            best_f1: self.best_f1,
            history,
            last_evaluation,
        })
    }

    /// One pass over the training records; returns mean loss and accuracy
    fn train_epoch(&mut self, dataset: &RelationDataset, epoch: usize) -> Result<(f32, f32)> {
        let mut shuffle_rng = ChaCha8Rng::seed_from_u64(
            self.config.general.seed.wrapping_add(epoch as u64),
        );
        let batches = self.collator().batches(
            &dataset.records,
            self.config.train.batch_size,
            self.config.train.shuffle_data.then_some(&mut shuffle_rng),
        );

        let acc_steps = self.config.train.gradient_acc_steps.max(1);
        let tag_ids = self.tag_ids()?;
        let mut pending = HeadGradients::zeros(&self.head)?;
        let mut pending_steps = 0;
        let mut losses = Vec::with_capacity(batches.len());
        let mut accuracies = Vec::with_capacity(batches.len());

        for (i, batch) in batches.iter().enumerate() {
            let features = self.features(batch, tag_ids)?;
            let logits = self.head.forward_train(&features, &mut self.rng)?;
            let labels = batch.labels.to_vec();
            let loss = match cross_entropy(&logits, &labels)? {
                Some(loss) => {
                    let grads = HeadGradients::from_backward(&self.head, &loss)?;
                    pending.accumulate(&grads, 1.0 / acc_steps as f32)?;
                    scalar(&loss)?
                }
                None => 0.0,
            };
            pending_steps += 1;

            let metrics = evaluate(&labels, &argmax_rows(&logits)?);
            losses.push(loss);
            accuracies.push(metrics.accuracy);

            if pending_steps == acc_steps || i + 1 == batches.len() {
                let norm = clip_grad_norm(&mut pending, self.config.train.max_grad_norm)?;
                let lr = self.scheduler.lr();
                self.optimizer.update(&self.head, &pending, lr)?;
                self.scheduler.step();
                tracing::debug!(
                    "Epoch {} batch {} | loss {:.4} | accuracy {:.3} | grad norm {:.4} | lr {:.2e}",
                    epoch,
                    i,
                    loss,
                    metrics.accuracy,
                    norm,
                    lr
                );
                pending = HeadGradients::zeros(&self.head)?;
                pending_steps = 0;
            }
        }

        Ok((mean(&losses), mean(&accuracies)))
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Average loss and metrics over the batches of `dataset`
    pub fn evaluate_results(&self, dataset: &RelationDataset) -> Result<EvaluationSummary> {
        tracing::info!("Evaluating {} records", dataset.len());
        let tag_ids = self.tag_ids()?;
        let batches =
            self.collator()
                .batches::<ChaCha8Rng>(&dataset.records, self.config.train.batch_size, None);

        let mut accumulator = MetricsAccumulator::new();
        for batch in &batches {
            let logits = self.head.forward(&self.features(batch, tag_ids)?)?;
            let labels = batch.labels.to_vec();
            let loss = match cross_entropy(&logits, &labels)? {
                Some(loss) => scalar(&loss)?,
                None => 0.0,
            };
            accumulator.add(loss, &evaluate(&labels, &argmax_rows(&logits)?));
        }

        let batch_count = accumulator.batches();
        let summary = accumulator.finish();
        self.log_evaluation(&summary, batch_count, dataset);
        Ok(summary)
    }

    /// Assemble `source` without splitting and evaluate all of it
    pub fn evaluate(&mut self, source: &TrainingSource) -> Result<EvaluationSummary> {
        let assembler =
            DatasetAssembler::new(self.tokenizer, &self.config.general, &self.concepts)?;
        let dataset = if self.config.train.isolated_test_labels {
            assemble_dataset(&assembler, source, &mut LabelRegistry::new())?
        } else {
            let mut dataset = assemble_dataset(&assembler, source, &mut self.config.labels)?;
            dataset.refresh(&self.config.labels);
            dataset
        };

        self.ensure_classes(dataset.class_count.max(self.config.labels.output_width()))?;
        self.evaluate_results(&dataset)
    }

    fn log_evaluation(&self, summary: &EvaluationSummary, batches: usize, dataset: &RelationDataset) {
        tracing::info!(
            "Evaluation | batches {} | loss {:.3} | accuracy {:.3} | precision {:.3} | recall {:.3} | f1 {:.3}",
            batches,
            summary.loss,
            summary.accuracy,
            summary.precision,
            summary.recall,
            summary.f1
        );
        for (label_id, stats) in &summary.per_label {
            let name = dataset
                .index_to_label
                .get(label_id)
                .map(String::as_str)
                .or_else(|| self.config.labels.label_of(*label_id))
                .unwrap_or("?");
            tracing::info!(
                " label: {} | f1: {:.3} | prec: {:.3} | acc: {:.3} | recall: {:.3}",
                name,
                stats.f1,
                stats.precision,
                stats.accuracy,
                stats.recall
            );
        }
    }

    // ------------------------------------------------------------------------
    // Model Directory
    // ------------------------------------------------------------------------

    /// Write `config.toml` (labels included) and the current weights
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| ClinrelError::io(dir, e))?;
        self.config.to_file(dir.join(MODEL_CONFIG_FILE))?;
        write_json(&dir.join(MODEL_WEIGHTS_FILE), &self.state()?)?;
        tracing::info!("Saved model to {}", dir.display());
        Ok(())
    }

    /// Restore a classifier written by [`RelationClassifier::save`]
    pub fn load(
        dir: impl AsRef<Path>,
        tokenizer: &'a dyn Tokenizer,
        encoder: &'a dyn TextEncoder,
        concepts: ConceptTypes,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let config = AppConfig::from_file(dir.join(MODEL_CONFIG_FILE))?;
        let state: TrainingState = read_json(&dir.join(MODEL_WEIGHTS_FILE))?;

        let mut classifier = Self::new(config, tokenizer, encoder, concepts)?;
        classifier.restore(state)?;
        tracing::info!(
            "Loaded model from {} | {} labels | epoch {}",
            dir.display(),
            classifier.labels().class_count(),
            classifier.epoch
        );
        Ok(classifier)
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clinrel_core::{EmbeddingTableEncoder, Entity, WordTokenizer};

    const TEXT: &str = "rash after aspirin and nausea after ondansetron";

    fn create_tokenizer() -> WordTokenizer {
        WordTokenizer::from_corpus([TEXT], 64).unwrap()
    }

    fn create_config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.general.create_addl_rels = true;
        config.train.checkpoint_dir = dir.to_path_buf();
        config.train.batch_size = 2;
        config.train.test_size = 0.5;
        config.model.hidden_size = 8;
        config
    }

    fn create_documents() -> Vec<Document> {
        vec![Document::new("d1", TEXT)
            .with_entity(Entity::new("rash", 0, 4).with_id("1"))
            .with_entity(Entity::new("aspirin", 11, 18).with_id("2"))
            .with_entity(Entity::new("nausea", 23, 29).with_id("3"))
            .with_entity(Entity::new("ondansetron", 36, 47).with_id("4"))]
    }

    #[test]
    fn test_empty_source_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = create_tokenizer();
        let encoder = EmbeddingTableEncoder::random(tokenizer.vocab_size(), 4, 1);
        let mut classifier = RelationClassifier::new(
            create_config(dir.path()),
            &tokenizer,
            &encoder,
            ConceptTypes::new(),
        )
        .unwrap();

        let err = classifier.train(&TrainingSource::new()).unwrap_err();
        assert!(matches!(err, ClinrelError::Config(_)));
        // nothing was written
        assert!(!classifier.checkpoint_store().history_path().exists());
    }

    #[test]
    fn test_source_flags() {
        assert!(TrainingSource::new().is_empty());
        assert!(!TrainingSource::new().with_export("x.json").is_empty());
        assert!(!TrainingSource::new().with_documents(create_documents()).is_empty());
    }

    #[test]
    fn test_train_on_documents_writes_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = create_tokenizer();
        let encoder = EmbeddingTableEncoder::random(tokenizer.vocab_size(), 4, 1);
        let mut classifier = RelationClassifier::new(
            create_config(dir.path()),
            &tokenizer,
            &encoder,
            ConceptTypes::new(),
        )
        .unwrap();

        let report = classifier
            .train(&TrainingSource::new().with_documents(create_documents()))
            .unwrap();

        assert_eq!(report.start_epoch, 0);
        assert_eq!(report.epoch, 1);
        assert_eq!(report.history.f1_per_epoch.len(), 1);
        assert!(classifier.labels().index_of("Other").is_some());

        let store = classifier.checkpoint_store();
        assert!(store.path(CheckpointKind::Periodic).exists());
        assert!(store.history_path().exists());
    }

    #[test]
    fn test_restore_rejects_other_encoder_width() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = create_tokenizer();
        let narrow = EmbeddingTableEncoder::random(tokenizer.vocab_size(), 4, 1);
        let wide = EmbeddingTableEncoder::random(tokenizer.vocab_size(), 6, 1);

        let config = create_config(dir.path());
        let source = RelationClassifier::new(config.clone(), &tokenizer, &narrow, ConceptTypes::new())
            .unwrap();
        let mut target =
            RelationClassifier::new(config, &tokenizer, &wide, ConceptTypes::new()).unwrap();

        let err = target.restore(source.state().unwrap()).unwrap_err();
        assert!(matches!(err, ClinrelError::Checkpoint(_)));
    }
}
