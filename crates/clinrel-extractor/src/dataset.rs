//! Dataset assembly
//!
//! Turns delimited rows, structured exports and live documents into one
//! uniform list of relation records, then resolves their labels against
//! the shared label registry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use clinrel_core::text::lowercase_in_place;
use clinrel_core::{
    AnnotatedDocument, ClinrelError, ConceptTypes, Document, Encoding, Entity, GeneralConfig,
    LabelRegistry, RelationRecord, Result, Tokenizer, UNKNOWN_LABEL,
};

use crate::delimited::{read_rows, DelimitedRow};
use crate::export::{ExportDocument, TrainerExport};
use crate::pairs::{OtherSampler, PairGenerator, PairKey};
use crate::windower::{
    CharSpan, ContextWindower, SchemaTags, TokenWindow, WindowConfig, DEFAULT_SCHEMA_TAGS,
};

// ============================================================================
// Dataset
// ============================================================================

/// Relation records plus a snapshot of the label registry
///
/// The snapshot is not tied to the registry; call
/// [`RelationDataset::refresh`] after the registry grows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationDataset {
    pub records: Vec<RelationRecord>,
    pub class_count: usize,
    pub label_to_index: BTreeMap<String, usize>,
    pub index_to_label: BTreeMap<usize, String>,
}

impl RelationDataset {
    /// Wrap records whose labels are not resolved yet
    pub fn new(records: Vec<RelationRecord>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Resolve every label, backfill `label_index` and refresh the snapshot
    pub fn resolve_labels(&mut self, registry: &mut LabelRegistry) {
        registry.resolve_all(self.records.iter().map(|r| r.label.as_str()));
        for record in &mut self.records {
            record.label_index = registry.index_of(&record.label);
        }
        self.refresh(registry);
    }

    /// Copy the registry mappings into the snapshot
    pub fn refresh(&mut self, registry: &LabelRegistry) {
        self.class_count = registry.class_count();
        self.label_to_index = registry.label_to_index().clone();
        self.index_to_label = registry.index_to_label().clone();
    }

    /// Record count per label, in label order
    pub fn samples_per_class(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.label.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Split off the first `test_size` fraction as the test set
    ///
    /// With `isolated_test_labels` the test labels are resolved in a fresh
    /// registry instead of keeping the shared indices.
    pub fn split(mut self, test_size: f32, isolated_test_labels: bool) -> (Self, Self) {
        let n_test = ((test_size * self.records.len() as f32) as usize).min(self.records.len());
        let train_records = self.records.split_off(n_test);

        let mut test = Self {
            records: self.records,
            class_count: self.class_count,
            label_to_index: self.label_to_index.clone(),
            index_to_label: self.index_to_label.clone(),
        };
        let train = Self {
            records: train_records,
            class_count: self.class_count,
            label_to_index: self.label_to_index,
            index_to_label: self.index_to_label,
        };

        if isolated_test_labels {
            test.resolve_labels(&mut LabelRegistry::new());
        }

        tracing::info!(
            "Split dataset: {} train / {} test records",
            train.len(),
            test.len()
        );
        (train, test)
    }

    /// Log the class breakdown
    pub fn log_summary(&self, source: &str) {
        tracing::info!(
            "{} dataset | records: {} | classes: {}",
            source,
            self.len(),
            self.class_count
        );
        for (label, count) in self.samples_per_class() {
            tracing::info!(" label: {} | samples: {}", label, count);
        }
    }
}

// ============================================================================
// Dataset Assembler
// ============================================================================

/// Builds relation datasets from every supported input source
pub struct DatasetAssembler<'a> {
    tokenizer: &'a dyn Tokenizer,
    config: &'a GeneralConfig,
    windower: ContextWindower<'a>,
    pairs: PairGenerator<'a>,
}

impl<'a> DatasetAssembler<'a> {
    pub fn new(
        tokenizer: &'a dyn Tokenizer,
        config: &'a GeneralConfig,
        concepts: &'a ConceptTypes,
    ) -> Result<Self> {
        Ok(Self {
            tokenizer,
            config,
            windower: ContextWindower::from_config(tokenizer, config)?,
            pairs: PairGenerator::new(
                tokenizer,
                concepts,
                config.window_size,
                &config.relation_type_filter_pairs,
            ),
        })
    }

    // ------------------------------------------------------------------------
    // Delimited rows
    // ------------------------------------------------------------------------

    /// Assemble from a tab-separated export
    pub fn from_delimited(
        &self,
        path: impl AsRef<Path>,
        registry: &mut LabelRegistry,
    ) -> Result<RelationDataset> {
        let path = path.as_ref();
        let rows = read_rows(path)?;
        let dataset = self.from_delimited_rows(&rows, registry)?;
        dataset.log_summary(&format!("CSV {}", path.display()));
        Ok(dataset)
    }

    /// Assemble from already parsed rows
    ///
    /// Rows whose markers do not survive windowing are dropped.
    pub fn from_delimited_rows(
        &self,
        rows: &[DelimitedRow],
        registry: &mut LabelRegistry,
    ) -> Result<RelationDataset> {
        let windower = self.tagged_windower()?;
        let mut records = Vec::with_capacity(rows.len());

        for (idx, row) in rows.iter().enumerate() {
            let document_id = row.doc_id.clone().unwrap_or_else(|| idx.to_string());
            let Some(encoding) = self.encode_document(&document_id, &row.sents) else {
                continue;
            };

            match windower.window_tagged(&row.sents, &encoding) {
                Ok(window) => records.push(RelationRecord {
                    token_ids: window.token_ids,
                    entity_positions: window.entity_positions,
                    entity1_text: row.ent1.clone().unwrap_or(window.entity1_text),
                    entity2_text: row.ent2.clone().unwrap_or(window.entity2_text),
                    label: row.label.trim().to_string(),
                    label_index: None,
                    entity1_types: row.entity1_types(),
                    entity2_types: row.entity2_types(),
                    entity1_id: row.ent1_id.clone(),
                    entity2_id: row.ent2_id.clone(),
                    entity1_concept_id: row.ent1_cui.clone(),
                    entity2_concept_id: row.ent2_cui.clone(),
                    document_id,
                    char_offsets: window.char_offsets,
                }),
                Err(reason) => {
                    tracing::debug!("Row {} dropped: {}", idx, reason);
                }
            }
        }

        let mut dataset = RelationDataset::new(records);
        dataset.resolve_labels(registry);
        Ok(dataset)
    }

    /// Windower that always marks entities, using default tags if none are configured
    fn tagged_windower(&self) -> Result<ContextWindower<'a>> {
        let tags = match self.windower.schema_tags() {
            Some(tags) => tags.clone(),
            None => SchemaTags::resolve(&DEFAULT_SCHEMA_TAGS, self.tokenizer)?.ok_or_else(|| {
                ClinrelError::Config("Delimited input needs entity marker tags".to_string())
            })?,
        };
        Ok(ContextWindower::new(
            self.tokenizer,
            WindowConfig::from(self.config),
            Some(tags),
        ))
    }

    // ------------------------------------------------------------------------
    // Structured export
    // ------------------------------------------------------------------------

    /// Assemble from a structured annotation export
    pub fn from_export(&self, export: &TrainerExport, registry: &mut LabelRegistry) -> RelationDataset {
        let sampler = OtherSampler::per_document(
            self.config.addl_rels_max_sample_size,
            export.document_count(),
            self.config.create_addl_rels_by_type,
        );
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        let mut records = Vec::new();
        for (document_id, document) in export.documents() {
            if document.text.is_empty() {
                continue;
            }
            records.extend(self.export_document_records(document, &document_id, &sampler, &mut rng));
        }

        let mut dataset = RelationDataset::new(records);
        dataset.resolve_labels(registry);
        dataset.log_summary("Export");
        dataset
    }

    /// Assemble from annotated documents without gold relations
    ///
    /// Only synthetic "Other" pairs can come out of this path.
    pub fn from_documents(&self, docs: &[Document], registry: &mut LabelRegistry) -> RelationDataset {
        self.from_export(&TrainerExport::from_documents(docs), registry)
    }

    fn export_document_records(
        &self,
        document: &ExportDocument,
        document_id: &str,
        sampler: &OtherSampler,
        rng: &mut ChaCha8Rng,
    ) -> Vec<RelationRecord> {
        let doc = document.to_document(document_id, self.config.lowercase);
        let Some(encoding) = self.encode_document(&doc.id, &doc.text) else {
            return Vec::new();
        };

        let by_id: HashMap<&str, &Entity> = doc
            .entities
            .iter()
            .filter_map(|e| e.id.as_deref().map(|id| (id, e)))
            .collect();

        let mut related = HashSet::new();
        let mut records = Vec::new();

        for relation in &document.relations {
            let mut relation = relation.clone();
            relation.canonicalize();

            let start_id = relation.start_entity.to_string();
            let end_id = relation.end_entity.to_string();
            related.insert(PairKey::from_ids(&start_id, &end_id));

            if !relation.validated || start_id == end_id {
                continue;
            }
            let (Some(&e1), Some(&e2)) = (by_id.get(start_id.as_str()), by_id.get(end_id.as_str()))
            else {
                tracing::debug!(
                    "Document {}: relation {}-{} references unknown annotations",
                    doc.id,
                    start_id,
                    end_id
                );
                continue;
            };
            if self.tokenizer.is_special_token(&relation.start_entity_value)
                || self.tokenizer.is_special_token(&relation.end_entity_value)
            {
                continue;
            }

            let types1 = self.pairs.types_of(e1);
            let types2 = self.pairs.types_of(e2);
            if !self.pairs.allows_types(&types1, &types2) {
                continue;
            }

            let span1 = CharSpan::new(relation.start_entity_start_idx, relation.start_entity_end_idx);
            let span2 = CharSpan::new(relation.end_entity_start_idx, relation.end_entity_end_idx);
            match self.windower.window(&doc.text, &encoding, span1, span2) {
                Ok(window) => records.push(build_record(
                    window,
                    &doc.id,
                    relation.relation.trim().to_string(),
                    (e1, types1),
                    (e2, types2),
                )),
                Err(reason) => {
                    tracing::debug!("Document {}: relation dropped: {}", doc.id, reason);
                }
            }
        }

        if self.config.create_addl_rels {
            let sampled = sampler.sample(self.pairs.candidates(&doc), &related, rng);
            for pair in sampled {
                let label = sampler.label(&pair);
                let span1 = CharSpan::new(pair.entity1.start, pair.entity1.end);
                let span2 = CharSpan::new(pair.entity2.start, pair.entity2.end);
                match self.windower.window(&doc.text, &encoding, span1, span2) {
                    Ok(window) => records.push(build_record(
                        window,
                        &doc.id,
                        label,
                        (pair.entity1, pair.entity1_types),
                        (pair.entity2, pair.entity2_types),
                    )),
                    Err(reason) => {
                        tracing::debug!("Document {}: synthetic pair dropped: {}", doc.id, reason);
                    }
                }
            }
        }

        records
    }

    // ------------------------------------------------------------------------
    // Live documents
    // ------------------------------------------------------------------------

    /// Candidate records of one document, labelled `UNK`
    ///
    /// Labels are not resolved, so the registry is left untouched.
    pub fn from_document(&self, doc: &dyn AnnotatedDocument) -> Vec<RelationRecord> {
        let text = if self.config.lowercase {
            lowercase_in_place(doc.text())
        } else {
            doc.text().to_string()
        };
        let Some(encoding) = self.encode_document(doc.document_id(), &text) else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for pair in self.pairs.candidates(doc) {
            let span1 = CharSpan::new(pair.entity1.start, pair.entity1.end);
            let span2 = CharSpan::new(pair.entity2.start, pair.entity2.end);
            match self.windower.window(&text, &encoding, span1, span2) {
                Ok(mut window) => {
                    window.entity1_text = pair.entity1.text.clone();
                    window.entity2_text = pair.entity2.text.clone();
                    records.push(build_record(
                        window,
                        doc.document_id(),
                        UNKNOWN_LABEL.to_string(),
                        (pair.entity1, pair.entity1_types),
                        (pair.entity2, pair.entity2_types),
                    ));
                }
                Err(reason) => {
                    tracing::debug!("Document {}: candidate dropped: {}", doc.document_id(), reason);
                }
            }
        }

        tracing::debug!(
            "Document {}: {} candidate records",
            doc.document_id(),
            records.len()
        );
        records
    }

    /// Tokenize a whole document once; failures skip the document
    fn encode_document(&self, document_id: &str, text: &str) -> Option<Encoding> {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => Some(encoding),
            Err(e) => {
                tracing::warn!("Document {} skipped: {}", document_id, e);
                None
            }
        }
    }
}

fn build_record(
    window: TokenWindow,
    document_id: &str,
    label: String,
    (entity1, types1): (&Entity, Vec<String>),
    (entity2, types2): (&Entity, Vec<String>),
) -> RelationRecord {
    RelationRecord {
        token_ids: window.token_ids,
        entity_positions: window.entity_positions,
        entity1_text: window.entity1_text,
        entity2_text: window.entity2_text,
        label,
        label_index: None,
        entity1_types: Some(types1),
        entity2_types: Some(types2),
        entity1_id: entity1.id.clone(),
        entity2_id: entity2.id.clone(),
        entity1_concept_id: entity1.cui.clone(),
        entity2_concept_id: entity2.cui.clone(),
        document_id: document_id.to_string(),
        char_offsets: window.char_offsets,
    }
}

// ============================================================================
// Tests
// ============================================================================
