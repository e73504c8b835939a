//! Prediction over live documents
//!
//! Candidate pairs go through the same windowing as training, labelled
//! `UNK`, so prediction never adds labels to the registry. Output follows
//! candidate order regardless of how batches were sorted.

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use clinrel_core::{AnnotatedDocument, Document, PredictedRelation, Result, UNKNOWN_LABEL};
use clinrel_extractor::DatasetAssembler;

use crate::head::{map_candle, softmax};
use crate::trainer::RelationClassifier;

/// Predictions for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPredictions {
    pub document_id: String,
    pub relations: Vec<PredictedRelation>,
}

/// Round to three decimals
pub fn round_confidence(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

impl RelationClassifier<'_> {
    /// Classify every candidate pair of `doc`
    pub fn predict(&self, doc: &dyn AnnotatedDocument) -> Result<Vec<PredictedRelation>> {
        let assembler =
            DatasetAssembler::new(self.tokenizer, &self.config.general, &self.concepts)?;
        let records = assembler.from_document(doc);
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let tag_ids = self.tag_ids()?;
        let batches = self.collator().batches::<ChaCha8Rng>(
            &records,
            self.config.train.batch_size,
            None,
        );

        let mut predictions: Vec<Option<PredictedRelation>> = vec![None; records.len()];
        for batch in &batches {
            let logits = self.head.forward(&self.features(batch, tag_ids)?)?;
            let probs = softmax(&logits)?.to_vec2::<f32>().map_err(map_candle)?;

            for (row, &idx) in batch.record_indices.iter().enumerate() {
                let (label_id, confidence) = probs[row].iter().enumerate().fold(
                    (0usize, f32::NEG_INFINITY),
                    |best, (i, &p)| if p > best.1 { (i, p) } else { best },
                );
                let record = &records[idx];

                predictions[idx] = Some(PredictedRelation {
                    relation: self
                        .config
                        .labels
                        .label_of(label_id)
                        .unwrap_or(UNKNOWN_LABEL)
                        .to_string(),
                    label_id,
                    ent1_text: record.entity1_text.clone(),
                    ent2_text: record.entity2_text.clone(),
                    confidence: round_confidence(confidence),
                    start_entity_id: record.entity1_id.clone(),
                    end_entity_id: record.entity2_id.clone(),
                });
            }
        }

        let relations: Vec<PredictedRelation> = predictions.into_iter().flatten().collect();
        tracing::info!(
            "Document {}: {} relations predicted",
            doc.document_id(),
            relations.len()
        );
        Ok(relations)
    }

    /// Classify the candidate pairs of several documents
    pub fn predict_documents(&self, docs: &[Document]) -> Result<Vec<DocumentPredictions>> {
        docs.iter()
            .map(|doc| {
                Ok(DocumentPredictions {
                    document_id: doc.id.clone(),
                    relations: self.predict(doc)?,
                })
            })
            .collect()
    }
}
