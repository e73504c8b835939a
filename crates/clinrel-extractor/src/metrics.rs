//! Quality Metrics module
//!
//! One-vs-rest precision, recall, F1 and accuracy for relation
//! classification, per label and micro-averaged over a batch.
//!
//! Every ratio whose denominator would be zero divides by 1.0 instead, so
//! a label never predicted scores 0.0 precision rather than NaN.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn guarded(numerator: f32, denominator: f32) -> f32 {
    let denominator = if denominator > 0.0 { denominator } else { 1.0 };
    numerator / denominator
}

fn f1(precision: f32, recall: f32) -> f32 {
    guarded(2.0 * precision * recall, precision + recall)
}

// ============================================================================
// Label Statistics
// ============================================================================

/// One-vs-rest counts and scores for a single label
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelStats {
    /// True label and prediction are both this label
    pub true_positives: usize,
    /// Predicted this label, true label differs
    pub false_positives: usize,
    /// True label is this label, prediction differs
    pub false_negatives: usize,
    /// Neither true label nor prediction is this label
    pub true_negatives: usize,

    pub accuracy: f32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

impl LabelStats {
    fn score(&mut self, batch_size: usize) {
        let tp = self.true_positives as f32;
        self.accuracy = guarded(tp + self.true_negatives as f32, batch_size as f32);
        self.precision = guarded(tp, tp + self.false_positives as f32);
        self.recall = guarded(tp, tp + self.false_negatives as f32);
        self.f1 = f1(self.precision, self.recall);
    }
}

/// Scores of one evaluated batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    /// Total true positives over the batch size
    pub accuracy: f32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,

    /// Statistics for each label present among the true labels
    pub per_label: BTreeMap<usize, LabelStats>,
}

/// Score predictions against true labels
///
/// Positions whose true label is negative (padding) are ignored. Only
/// labels that occur among the true labels get statistics.
pub fn evaluate(true_labels: &[i64], predicted: &[i64]) -> BatchMetrics {
    let pairs: Vec<(i64, i64)> = true_labels
        .iter()
        .zip(predicted)
        .filter(|(t, _)| **t >= 0)
        .map(|(&t, &p)| (t, p))
        .collect();
    let batch_size = pairs.len();

    let mut per_label = BTreeMap::new();
    let (mut total_tp, mut total_fp, mut total_fn) = (0usize, 0usize, 0usize);

    let mut labels: Vec<i64> = pairs.iter().map(|&(t, _)| t).collect();
    labels.sort_unstable();
    labels.dedup();

    for label in labels {
        let mut stats = LabelStats::default();
        for &(truth, pred) in &pairs {
            match (truth == label, pred == label) {
                (true, true) => stats.true_positives += 1,
                (false, true) => stats.false_positives += 1,
                (true, false) => stats.false_negatives += 1,
                (false, false) => stats.true_negatives += 1,
            }
        }
        stats.score(batch_size);

        total_tp += stats.true_positives;
        total_fp += stats.false_positives;
        total_fn += stats.false_negatives;
        per_label.insert(label as usize, stats);
    }

    let tp = total_tp as f32;
    let precision = guarded(tp, tp + total_fp as f32);
    let recall = guarded(tp, tp + total_fn as f32);

    BatchMetrics {
        accuracy: guarded(tp, batch_size as f32),
        precision,
        recall,
        f1: f1(precision, recall),
        per_label,
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Mean of batch metrics over an evaluation pass
///
/// Scores are averaged over the batches seen. Per-label counts are summed
/// and per-label scores are averaged over every batch, so a batch in which a
/// label does not occur counts as zero for it.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    batches: usize,
    loss: f32,
    accuracy: f32,
    precision: f32,
    recall: f32,
    f1: f32,
    per_label: BTreeMap<usize, LabelStats>,
}

/// Averaged result of an evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub loss: f32,
    pub accuracy: f32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub per_label: BTreeMap<usize, LabelStats>,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, loss: f32, metrics: &BatchMetrics) {
        self.batches += 1;
        self.loss += loss;
        self.accuracy += metrics.accuracy;
        self.precision += metrics.precision;
        self.recall += metrics.recall;
        self.f1 += metrics.f1;

        for (&label, stats) in &metrics.per_label {
            let sum = self.per_label.entry(label).or_default();
            sum.true_positives += stats.true_positives;
            sum.false_positives += stats.false_positives;
            sum.false_negatives += stats.false_negatives;
            sum.true_negatives += stats.true_negatives;
            sum.accuracy += stats.accuracy;
            sum.precision += stats.precision;
            sum.recall += stats.recall;
            sum.f1 += stats.f1;
        }
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn finish(self) -> EvaluationSummary {
        let n = self.batches.max(1) as f32;
        let per_label = self
            .per_label
            .into_iter()
            .map(|(label, mut stats)| {
                stats.accuracy /= n;
                stats.precision /= n;
                stats.recall /= n;
                stats.f1 /= n;
                (label, stats)
            })
            .collect();

        EvaluationSummary {
            loss: self.loss / n,
            accuracy: self.accuracy / n,
            precision: self.precision / n,
            recall: self.recall / n,
            f1: self.f1 / n,
            per_label,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_vs_rest_counts() {
        let metrics = evaluate(&[0, 0, 1, 1], &[0, 1, 1, 1]);

        let label1 = &metrics.per_label[&1];
        assert_eq!(label1.true_positives, 2);
        assert_eq!(label1.false_positives, 1);
        assert_eq!(label1.false_negatives, 0);
        assert_eq!(label1.true_negatives, 1);
        assert!((label1.accuracy - 0.75).abs() < 1e-6);
        assert!((label1.precision - 2.0 / 3.0).abs() < 1e-6);
        assert!((label1.recall - 1.0).abs() < 1e-6);

        let label0 = &metrics.per_label[&0];
        assert_eq!(label0.true_positives, 1);
        assert_eq!(label0.false_negatives, 1);
        assert_eq!(label0.false_positives, 0);
    }

    #[test]
    fn test_micro_scores_from_totals() {
        let metrics = evaluate(&[0, 0, 1, 1], &[0, 1, 1, 1]);

        // totals: tp = 3, fp = 1, fn = 1
        let precision = 3.0 / 4.0;
        let recall = 3.0 / 4.0;
        let expected_f1 = 2.0 * precision * recall / (precision + recall);

        assert!((metrics.accuracy - 0.75).abs() < 1e-6);
        assert!((metrics.precision - precision).abs() < 1e-6);
        assert!((metrics.recall - recall).abs() < 1e-6);
        assert!((metrics.f1 - expected_f1).abs() < 1e-6);
    }

    #[test]
    fn test_zero_denominators() {
        // label 1 is never predicted
        let metrics = evaluate(&[1, 1], &[0, 0]);
        let label1 = &metrics.per_label[&1];

        assert_eq!(label1.precision, 0.0);
        assert_eq!(label1.recall, 0.0);
        assert_eq!(label1.f1, 0.0);
        assert!(!metrics.per_label.contains_key(&0));

        let empty = evaluate(&[], &[]);
        assert_eq!(empty.f1, 0.0);
        assert!(empty.per_label.is_empty());
    }

    #[test]
    fn test_padding_is_ignored() {
        let metrics = evaluate(&[1, -1, -1], &[1, 0, 0]);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.per_label.len(), 1);
    }

    #[test]
    fn test_accumulator_averages_batches() {
        let mut acc = MetricsAccumulator::new();
        acc.add(1.0, &evaluate(&[0, 1], &[0, 1]));
        acc.add(3.0, &evaluate(&[0, 1], &[1, 0]));

        let summary = acc.finish();
        assert!((summary.loss - 2.0).abs() < 1e-6);
        assert!((summary.f1 - 0.5).abs() < 1e-6);
        assert_eq!(summary.per_label[&0].true_positives, 1);
        assert!((summary.per_label[&0].precision - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_label_missing_from_a_batch_scores_zero_there() {
        let mut acc = MetricsAccumulator::new();
        acc.add(1.0, &evaluate(&[0, 1], &[0, 1]));
        // label 1 does not occur in this batch
        acc.add(1.0, &evaluate(&[0, 0], &[0, 0]));

        let summary = acc.finish();
        let label1 = &summary.per_label[&1];
        assert!((label1.f1 - 0.5).abs() < 1e-6);
        assert!((label1.precision - 0.5).abs() < 1e-6);
        assert_eq!(label1.true_positives, 1);
        assert!((summary.per_label[&0].f1 - 1.0).abs() < 1e-6);
    }
}
