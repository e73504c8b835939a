//! Candidate pair generation
//!
//! Enumerates the entity pairs of one document that may hold a relation,
//! and samples synthetic "Other" pairs for the no-relation class.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use clinrel_core::{AnnotatedDocument, ConceptTypes, Entity, Tokenizer, OTHER_LABEL};

/// Entity texts made only of these characters are never paired
pub const EXCLUDED_CHARS: &str = ":!@#$%^&*()-+?_=.,;<>/[]{}";

/// Two entities ordered by start character
#[derive(Debug, Clone)]
pub struct CandidatePair<'d> {
    pub entity1: &'d Entity,
    pub entity2: &'d Entity,
    pub entity1_types: Vec<String>,
    pub entity2_types: Vec<String>,
}

impl CandidatePair<'_> {
    /// Key identifying the pair regardless of the relation direction
    pub fn key(&self) -> PairKey {
        PairKey::new(self.entity1, self.entity2)
    }
}

/// Unordered identity of an entity pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey(String, String);

impl PairKey {
    pub fn new(a: &Entity, b: &Entity) -> Self {
        Self::from_ids(&entity_key(a), &entity_key(b))
    }

    pub fn from_ids(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }
}

fn entity_key(entity: &Entity) -> String {
    match &entity.id {
        Some(id) => id.clone(),
        None => format!("{}:{}", entity.start, entity.end),
    }
}

// ============================================================================
// Pair Generator
// ============================================================================

/// Enumerates eligible entity pairs of a document
pub struct PairGenerator<'a> {
    tokenizer: &'a dyn Tokenizer,
    concepts: &'a ConceptTypes,
    window_size: usize,
    type_filter: &'a [(String, String)],
}

impl<'a> PairGenerator<'a> {
    pub fn new(
        tokenizer: &'a dyn Tokenizer,
        concepts: &'a ConceptTypes,
        window_size: usize,
        type_filter: &'a [(String, String)],
    ) -> Self {
        Self {
            tokenizer,
            concepts,
            window_size,
            type_filter,
        }
    }

    /// Semantic types of an entity, looked up by CUI when not annotated
    pub fn types_of(&self, entity: &Entity) -> Vec<String> {
        if !entity.types.is_empty() {
            return entity.types.clone();
        }
        entity
            .cui
            .as_deref()
            .map(|cui| self.concepts.types_of(cui))
            .unwrap_or_default()
    }

    /// Whether an entity text can take part in a pair
    pub fn is_pairable_text(&self, text: &str) -> bool {
        let trimmed = text.trim();
        !trimmed.is_empty()
            && !trimmed.chars().all(|c| EXCLUDED_CHARS.contains(c))
            && !self.tokenizer.is_special_token(trimmed)
    }

    /// Whether the type whitelist admits `(types1, types2)` in this order
    pub fn allows_types(&self, types1: &[String], types2: &[String]) -> bool {
        self.type_filter.is_empty()
            || self
                .type_filter
                .iter()
                .any(|(t1, t2)| types1.contains(t1) && types2.contains(t2))
    }

    /// All eligible pairs of `doc`, entity 1 always starting first
    pub fn candidates<'d>(&self, doc: &'d dyn AnnotatedDocument) -> Vec<CandidatePair<'d>> {
        let entities = doc.entities();
        let mut pairs = Vec::new();

        for (i, a) in entities.iter().enumerate() {
            for b in &entities[i + 1..] {
                if let Some(pair) = self.pair(a, b) {
                    pairs.push(pair);
                }
            }
        }

        tracing::debug!(
            "Document {}: {} candidate pairs from {} entities",
            doc.document_id(),
            pairs.len(),
            entities.len()
        );
        pairs
    }

    /// Check one pair of entities, normalizing their order
    pub fn pair<'d>(&self, a: &'d Entity, b: &'d Entity) -> Option<CandidatePair<'d>> {
        let (first, second) = if (b.start, b.end) < (a.start, a.end) {
            (b, a)
        } else {
            (a, b)
        };

        if first.start == second.start && first.end == second.end {
            return None;
        }
        if first.id.is_some() && first.id == second.id {
            return None;
        }
        if !self.is_pairable_text(&first.text) || !self.is_pairable_text(&second.text) {
            return None;
        }
        if first.text == second.text {
            return None;
        }
        if second.start - first.start > self.window_size {
            return None;
        }

        let entity1_types = self.types_of(first);
        let entity2_types = self.types_of(second);
        if !self.allows_types(&entity1_types, &entity2_types) {
            return None;
        }

        Some(CandidatePair {
            entity1: first,
            entity2: second,
            entity1_types,
            entity2_types,
        })
    }
}

// ============================================================================
// Synthetic "Other" Sampling
// ============================================================================

/// Samples unrelated validated pairs as the no-relation class
#[derive(Debug, Clone)]
pub struct OtherSampler {
    quota: usize,
    by_type: bool,
}

impl OtherSampler {
    pub fn new(quota: usize, by_type: bool) -> Self {
        Self { quota, by_type }
    }

    /// Split a global budget evenly across documents
    ///
    /// Documents that cannot fill their share do not pass the surplus on.
    pub fn per_document(max_samples: usize, document_count: usize, by_type: bool) -> Self {
        let quota = if document_count == 0 {
            0
        } else {
            max_samples / document_count
        };
        Self::new(quota, by_type)
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    /// Draw up to `quota` validated pairs not present in `related`
    pub fn sample<'d, R: Rng + ?Sized>(
        &self,
        candidates: Vec<CandidatePair<'d>>,
        related: &HashSet<PairKey>,
        rng: &mut R,
    ) -> Vec<CandidatePair<'d>> {
        if self.quota == 0 {
            return Vec::new();
        }

        let mut eligible: Vec<CandidatePair<'d>> = candidates
            .into_iter()
            .filter(|p| p.entity1.validated && p.entity2.validated)
            .filter(|p| !related.contains(&p.key()))
            .collect();

        eligible.shuffle(rng);
        eligible.truncate(self.quota);
        eligible
    }

    /// Label of a sampled pair
    pub fn label(&self, pair: &CandidatePair<'_>) -> String {
        if !self.by_type {
            return OTHER_LABEL.to_string();
        }
        match (pair.entity1_types.first(), pair.entity2_types.first()) {
            (Some(t1), Some(t2)) => format!("{OTHER_LABEL}{t1}-{t2}"),
            _ => OTHER_LABEL.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clinrel_core::{Document, WordTokenizer};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn create_entity(id: &str, text: &str, start: usize, types: &[&str]) -> Entity {
        Entity::new(text, start, start + text.chars().count())
            .with_id(id)
            .with_types(types.iter().map(|t| t.to_string()).collect())
    }

    fn create_document() -> Document {
        // "aspirin caused rash and nausea"
        Document::new("d1", "aspirin caused rash and nausea")
            .with_entity(create_entity("3", "nausea", 24, &["Sign or Symptom"]))
            .with_entity(create_entity("1", "aspirin", 0, &["Pharmacologic Substance"]))
            .with_entity(create_entity("2", "rash", 15, &["Sign or Symptom"]))
    }

    #[test]
    fn test_candidates_are_ordered() {
        let tokenizer = WordTokenizer::new(64).unwrap();
        let concepts = ConceptTypes::new();
        let generator = PairGenerator::new(&tokenizer, &concepts, 300, &[]);
        let doc = create_document();

        let pairs = generator.candidates(&doc);
        assert_eq!(pairs.len(), 3);
        for pair in &pairs {
            assert!(pair.entity1.start <= pair.entity2.start);
        }
    }

    #[test]
    fn test_window_size_limits_pairs() {
        let tokenizer = WordTokenizer::new(64).unwrap();
        let concepts = ConceptTypes::new();
        let generator = PairGenerator::new(&tokenizer, &concepts, 15, &[]);
        let doc = create_document();

        let pairs = generator.candidates(&doc);
        // aspirin-nausea is 24 chars apart
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_whitelist_checks_normalized_order_only() {
        let tokenizer = WordTokenizer::new(64).unwrap();
        let concepts = ConceptTypes::new();
        let filter = vec![(
            "Sign or Symptom".to_string(),
            "Pharmacologic Substance".to_string(),
        )];
        let generator = PairGenerator::new(&tokenizer, &concepts, 300, &filter);
        let doc = create_document();

        // drug always precedes its symptoms here, so the reversed entry never matches
        assert!(generator.candidates(&doc).is_empty());

        let filter = vec![(
            "Pharmacologic Substance".to_string(),
            "Sign or Symptom".to_string(),
        )];
        let generator = PairGenerator::new(&tokenizer, &concepts, 300, &filter);
        assert_eq!(generator.candidates(&doc).len(), 2);
    }

    #[test]
    fn test_excluded_texts_are_skipped() {
        let mut tokenizer = WordTokenizer::new(64).unwrap();
        tokenizer.add_special_tokens(&["[s1]"]);
        let concepts = ConceptTypes::new();
        let generator = PairGenerator::new(&tokenizer, &concepts, 300, &[]);

        let rash = create_entity("1", "rash", 0, &[]);
        assert!(generator.pair(&rash, &create_entity("2", "...", 10, &[])).is_none());
        assert!(generator.pair(&rash, &create_entity("3", "[s1]", 10, &[])).is_none());
        assert!(generator.pair(&rash, &create_entity("4", "rash", 10, &[])).is_none());
        assert!(generator.pair(&rash, &rash.clone()).is_none());
        assert!(generator.pair(&rash, &create_entity("5", "fever", 10, &[])).is_some());
    }

    #[test]
    fn test_types_from_concept_table() {
        let tokenizer = WordTokenizer::new(64).unwrap();
        let mut concepts = ConceptTypes::new();
        concepts.insert("C0015967", vec!["Sign or Symptom".to_string()]);
        let generator = PairGenerator::new(&tokenizer, &concepts, 300, &[]);

        let fever = Entity::new("fever", 0, 5).with_cui("C0015967");
        assert_eq!(generator.types_of(&fever), vec!["Sign or Symptom"]);
    }

    #[test]
    fn test_other_sampler_respects_quota_and_relations() {
        let tokenizer = WordTokenizer::new(64).unwrap();
        let concepts = ConceptTypes::new();
        let generator = PairGenerator::new(&tokenizer, &concepts, 300, &[]);
        let doc = create_document();
        let candidates = generator.candidates(&doc);

        let mut related = HashSet::new();
        related.insert(PairKey::new(&doc.entities[1], &doc.entities[2]));

        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let sampler = OtherSampler::per_document(4, 2, false);
        let sampled = sampler.sample(candidates.clone(), &related, &mut rng);
        assert_eq!(sampled.len(), 2);
        assert!(sampled.iter().all(|p| !related.contains(&p.key())));

        let sampler = OtherSampler::per_document(1, 2, false);
        assert!(sampler.sample(candidates, &related, &mut rng).is_empty());
    }

    #[test]
    fn test_other_sampler_skips_unvalidated() {
        let tokenizer = WordTokenizer::new(64).unwrap();
        let concepts = ConceptTypes::new();
        let generator = PairGenerator::new(&tokenizer, &concepts, 300, &[]);
        let mut doc = create_document();
        doc.entities[0].validated = false;

        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let sampler = OtherSampler::new(10, false);
        let sampled = sampler.sample(generator.candidates(&doc), &HashSet::new(), &mut rng);
        assert_eq!(sampled.len(), 1);
    }

    #[test]
    fn test_other_label_by_type() {
        let tokenizer = WordTokenizer::new(64).unwrap();
        let concepts = ConceptTypes::new();
        let generator = PairGenerator::new(&tokenizer, &concepts, 300, &[]);
        let doc = create_document();
        let pairs = generator.candidates(&doc);

        let sampler = OtherSampler::new(1, true);
        assert_eq!(
            sampler.label(&pairs[0]),
            "OtherPharmacologic Substance-Sign or Symptom"
        );
        assert_eq!(OtherSampler::new(1, false).label(&pairs[0]), "Other");
    }

    proptest! {
        #[test]
        fn prop_pairs_start_in_order(starts in proptest::collection::vec(0usize..200, 2..8)) {
            let tokenizer = WordTokenizer::new(64).unwrap();
            let concepts = ConceptTypes::new();
            let generator = PairGenerator::new(&tokenizer, &concepts, 1000, &[]);

            let mut doc = Document::new("p", "x".repeat(220));
            for (i, start) in starts.iter().enumerate() {
                doc = doc.with_entity(Entity::new(format!("e{i}"), *start, start + 3).with_id(i.to_string()));
            }

            for pair in generator.candidates(&doc) {
                prop_assert!(pair.entity1.start <= pair.entity2.start);
            }
        }
    }
}
