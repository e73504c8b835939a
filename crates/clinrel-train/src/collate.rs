//! Batch collation
//!
//! Groups relation records into padded tensors. Records inside a batch are
//! sorted by descending token count; `record_indices` maps every row back to
//! its position in the source record list.

use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::Rng;

use clinrel_core::RelationRecord;

/// Label value of rows without a class index
pub const LABEL_PAD: i64 = -1;

/// One padded batch
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch, max_len]`, padded with the tokenizer pad id
    pub token_ids: Array2<i64>,

    /// `[batch, max_len]`, 1.0 on real tokens
    pub attention_mask: Array2<f32>,

    /// `[batch, 2]` token index of entity 1 and entity 2
    pub entity_positions: Array2<i64>,

    /// `[batch]` class indices, `LABEL_PAD` when unresolved
    pub labels: Array1<i64>,

    /// Unpadded token count per row
    pub lengths: Vec<usize>,

    /// Source record index per row
    pub record_indices: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Padded width
    pub fn max_len(&self) -> usize {
        self.token_ids.ncols()
    }

    /// All-zero segment ids
    pub fn token_type_ids(&self) -> Array2<i64> {
        Array2::zeros(self.token_ids.dim())
    }
}

/// Pads and sorts records into [`Batch`]es
#[derive(Debug, Clone, Copy)]
pub struct BatchCollator {
    pad_id: u32,
}

impl BatchCollator {
    pub fn new(pad_id: u32) -> Self {
        Self { pad_id }
    }

    /// Collate the records at `indices`
    pub fn collate(&self, records: &[RelationRecord], indices: &[usize]) -> Batch {
        let mut order: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i < records.len())
            .collect();
        // stable, so equal lengths keep their input order
        order.sort_by(|&a, &b| records[b].token_ids.len().cmp(&records[a].token_ids.len()));

        let batch = order.len();
        let max_len = order
            .first()
            .map(|&i| records[i].token_ids.len())
            .unwrap_or(0);

        let mut token_ids = Array2::from_elem((batch, max_len), self.pad_id as i64);
        let mut attention_mask = Array2::zeros((batch, max_len));
        let mut entity_positions = Array2::zeros((batch, 2));
        let mut labels = Array1::from_elem(batch, LABEL_PAD);
        let mut lengths = Vec::with_capacity(batch);

        for (row, &idx) in order.iter().enumerate() {
            let record = &records[idx];
            for (col, &id) in record.token_ids.iter().enumerate() {
                token_ids[[row, col]] = id as i64;
                attention_mask[[row, col]] = 1.0;
            }
            entity_positions[[row, 0]] = record.entity_positions.0 as i64;
            entity_positions[[row, 1]] = record.entity_positions.1 as i64;
            if let Some(label) = record.label_index {
                labels[row] = label as i64;
            }
            lengths.push(record.token_ids.len());
        }

        Batch {
            token_ids,
            attention_mask,
            entity_positions,
            labels,
            lengths,
            record_indices: order,
        }
    }

    /// Cut `records` into batches of at most `batch_size`, optionally shuffled
    pub fn batches<R: Rng + ?Sized>(
        &self,
        records: &[RelationRecord],
        batch_size: usize,
        rng: Option<&mut R>,
    ) -> Vec<Batch> {
        let mut indices: Vec<usize> = (0..records.len()).collect();
        if let Some(rng) = rng {
            indices.shuffle(rng);
        }

        let batch_size = batch_size.clamp(1, records.len().max(1));
        indices
            .chunks(batch_size)
            .map(|chunk| self.collate(records, chunk))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn create_record(len: usize, label: Option<usize>) -> RelationRecord {
        RelationRecord {
            token_ids: (10..10 + len as u32).collect(),
            entity_positions: (0, len - 1),
            entity1_text: "a".to_string(),
            entity2_text: "b".to_string(),
            label: "L".to_string(),
            label_index: label,
            entity1_types: None,
            entity2_types: None,
            entity1_id: None,
            entity2_id: None,
            entity1_concept_id: None,
            entity2_concept_id: None,
            document_id: "0".to_string(),
            char_offsets: [0, 1, 2, 3],
        }
    }

    #[test]
    fn test_sorted_and_padded() {
        let records = vec![
            create_record(5, Some(0)),
            create_record(3, Some(1)),
            create_record(8, None),
        ];
        let batch = BatchCollator::new(0).collate(&records, &[0, 1, 2]);

        assert_eq!(batch.max_len(), 8);
        assert_eq!(batch.token_ids.dim(), (3, 8));
        assert_eq!(batch.attention_mask.dim(), (3, 8));
        assert_eq!(batch.lengths, vec![8, 5, 3]);
        assert_eq!(batch.record_indices, vec![2, 0, 1]);
        assert_eq!(batch.labels.to_vec(), vec![LABEL_PAD, 0, 1]);

        // the shortest row is padded after its third token
        assert_eq!(batch.token_ids[[2, 2]], 12);
        assert_eq!(batch.token_ids[[2, 3]], 0);
        assert_eq!(batch.attention_mask[[2, 3]], 0.0);
        assert_eq!(batch.entity_positions[[0, 1]], 7);
    }

    #[test]
    fn test_batches_cover_every_record_once() {
        let records: Vec<_> = (1..=7).map(|n| create_record(n + 1, Some(0))).collect();
        let collator = BatchCollator::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(13);

        let batches = collator.batches(&records, 3, Some(&mut rng));
        assert_eq!(batches.len(), 3);

        let mut seen: Vec<usize> = batches
            .iter()
            .flat_map(|b| b.record_indices.clone())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_batch_size_capped_by_dataset() {
        let records = vec![create_record(4, Some(0)), create_record(2, Some(0))];
        let batches = BatchCollator::new(0).batches::<ChaCha8Rng>(&records, 100, None);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn test_empty_input() {
        let batches = BatchCollator::new(0).batches::<ChaCha8Rng>(&[], 4, None);
        assert!(batches.is_empty());
    }
}
