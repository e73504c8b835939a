//! Tokenizer boundary
//!
//! Segmentation is delegated to the `tokenizers` pipeline; the rest of
//! the pipeline only relies on ids, token strings and character offsets.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokenizers::models::wordlevel::WordLevel;
use tokenizers::pre_tokenizers::whitespace::Whitespace;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{AddedToken, OffsetReferential, OffsetType, PreTokenizedString, PreTokenizer};

use crate::{ClinrelError, Result};

pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";
pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";

const BASE_SPECIAL: [&str; 4] = [PAD_TOKEN, UNK_TOKEN, CLS_TOKEN, SEP_TOKEN];

// ============================================================================
// Encoding
// ============================================================================

/// Result of tokenizing one text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoding {
    pub ids: Vec<u32>,
    pub tokens: Vec<String>,
    /// Character span of every token; special tokens have empty spans
    pub offsets: Vec<(usize, usize)>,
}

impl Encoding {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Index of the first token with id `id`
    pub fn position_of(&self, id: u32) -> Option<usize> {
        self.ids.iter().position(|&t| t == id)
    }

    /// Index of the token whose half-open span `[start, end)` holds `char_pos`
    ///
    /// Special tokens never match.
    pub fn token_at_char(&self, char_pos: usize) -> Option<usize> {
        self.offsets
            .iter()
            .position(|&(start, end)| start <= char_pos && char_pos < end)
    }

    /// Index of the token closing an exclusive span end `char_end`
    pub fn token_ending_at(&self, char_end: usize) -> Option<usize> {
        self.offsets
            .iter()
            .position(|&(start, end)| start < char_end && char_end <= end)
    }

    /// Cut to `max_len` tokens, keeping the closing special token
    pub fn truncate(&mut self, max_len: usize) {
        let max_len = max_len.max(2);
        if self.len() <= max_len {
            return;
        }
        let last = self.len() - 1;
        let (id, token, offset) = (
            self.ids[last],
            self.tokens[last].clone(),
            self.offsets[last],
        );
        self.ids.truncate(max_len - 1);
        self.tokens.truncate(max_len - 1);
        self.offsets.truncate(max_len - 1);
        self.ids.push(id);
        self.tokens.push(token);
        self.offsets.push(offset);
    }
}

// ============================================================================
// Tokenizer Trait
// ============================================================================

/// Trait for tokenizers
pub trait Tokenizer: Send + Sync {
    /// Tokenize `text`, wrapping it in the model's special tokens
    fn encode(&self, text: &str, truncation: bool) -> Result<Encoding>;

    fn token_to_id(&self, token: &str) -> Option<u32>;

    fn id_to_token(&self, id: u32) -> Option<String>;

    /// Whether `text` is one of the tokenizer's special tokens
    fn is_special_token(&self, text: &str) -> bool;

    /// Id used to pad sequences
    fn pad_id(&self) -> u32;

    fn vocab_size(&self) -> usize;

    /// Length limit applied when `truncation` is requested
    fn max_seq_length(&self) -> usize;

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Result<Vec<u32>> {
        tokens
            .iter()
            .map(|t| {
                self.token_to_id(t)
                    .ok_or_else(|| ClinrelError::Tokenizer(format!("Token not in vocabulary: {t}")))
            })
            .collect()
    }

    fn convert_ids_to_tokens(&self, ids: &[u32]) -> Result<Vec<String>> {
        ids.iter()
            .map(|&id| {
                self.id_to_token(id)
                    .ok_or_else(|| ClinrelError::Tokenizer(format!("Unknown token id: {id}")))
            })
            .collect()
    }
}

fn tokenizer_error(context: &str, e: impl std::fmt::Display) -> ClinrelError {
    ClinrelError::Tokenizer(format!("{context}: {e}"))
}

/// Run the pipeline of `inner` with character offsets
fn encode_pipeline(
    inner: &tokenizers::Tokenizer,
    text: &str,
    truncation: bool,
    max_seq_length: usize,
) -> Result<Encoding> {
    let encoded = inner
        .encode_char_offsets(text, true)
        .map_err(|e| tokenizer_error("Tokenization failed", e))?;

    let mut encoding = Encoding {
        ids: encoded.get_ids().to_vec(),
        tokens: encoded.get_tokens().to_vec(),
        offsets: encoded.get_offsets().to_vec(),
    };
    if truncation {
        encoding.truncate(max_seq_length);
    }
    Ok(encoding)
}

fn special_contents(inner: &tokenizers::Tokenizer) -> HashSet<String> {
    inner
        .get_added_tokens_decoder()
        .values()
        .filter(|t| t.special)
        .map(|t| t.content.clone())
        .collect()
}

fn register_special<S: AsRef<str>>(inner: &mut tokenizers::Tokenizer, tokens: &[S]) -> usize {
    let added: Vec<AddedToken> = tokens
        .iter()
        .map(|t| AddedToken::from(t.as_ref().to_string(), true))
        .collect();
    inner.add_special_tokens(&added)
}

// ============================================================================
// Word-level Tokenizer
// ============================================================================

/// Persisted form of a [`WordTokenizer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WordVocab {
    max_seq_length: usize,
    /// Serialized `tokenizers` pipeline
    tokenizer: serde_json::Value,
}

/// Word-level tokenizer over a vocabulary collected from a corpus
///
/// Words are split on whitespace and punctuation runs (`\w+|[^\w\s]+`).
/// Registered special tokens, entity markers included, are matched
/// before splitting and kept whole.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    inner: tokenizers::Tokenizer,
    special: HashSet<String>,
    max_seq_length: usize,
}

impl WordTokenizer {
    /// Create a tokenizer holding only `[PAD] [UNK] [CLS] [SEP]`
    pub fn new(max_seq_length: usize) -> Result<Self> {
        Self::with_vocab(BASE_SPECIAL.iter().map(ToString::to_string).collect(), max_seq_length)
    }

    /// Build a vocabulary from every word of `texts`
    pub fn from_corpus<'a, I>(texts: I, max_seq_length: usize) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut words: Vec<String> = BASE_SPECIAL.iter().map(ToString::to_string).collect();
        let mut seen: HashSet<String> = words.iter().cloned().collect();

        for text in texts {
            for word in pre_tokenize(text)? {
                if seen.insert(word.clone()) {
                    words.push(word);
                }
            }
        }
        tracing::debug!("Collected {} vocabulary words", words.len());
        Self::with_vocab(words, max_seq_length)
    }

    /// Load a tokenizer written by [`WordTokenizer::save`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ClinrelError::io(path, e))?;
        let saved: WordVocab = serde_json::from_str(&content)?;

        let inner = tokenizers::Tokenizer::from_str(&saved.tokenizer.to_string())
            .map_err(|e| tokenizer_error(&format!("Tokenizer load failed at {}", path.display()), e))?;

        Ok(Self {
            special: special_contents(&inner),
            inner,
            max_seq_length: saved.max_seq_length,
        })
    }

    /// Write the pipeline and length limit as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let pipeline = self
            .inner
            .to_string(false)
            .map_err(|e| tokenizer_error("Tokenizer serialization failed", e))?;
        let saved = WordVocab {
            max_seq_length: self.max_seq_length,
            tokenizer: serde_json::from_str(&pipeline)?,
        };
        let json = serde_json::to_string_pretty(&saved)?;
        std::fs::write(path, json).map_err(|e| ClinrelError::io(path, e))
    }

    /// Add tokens that are never split and never paired as entities
    pub fn add_special_tokens<S: AsRef<str>>(&mut self, tokens: &[S]) {
        register_special(&mut self.inner, tokens);
        self.special = special_contents(&self.inner);
    }

    fn with_vocab(words: Vec<String>, max_seq_length: usize) -> Result<Self> {
        let id_of = |token: &str| words.iter().position(|w| w == token).map(|i| i as u32);
        let (cls, sep) = match (id_of(CLS_TOKEN), id_of(SEP_TOKEN)) {
            (Some(cls), Some(sep)) => (cls, sep),
            _ => return Err(ClinrelError::Tokenizer("Vocabulary lacks [CLS]/[SEP]".to_string())),
        };

        let model = WordLevel::builder()
            .vocab(
                words
                    .iter()
                    .enumerate()
                    .map(|(id, word)| (word.clone(), id as u32))
                    .collect(),
            )
            .unk_token(UNK_TOKEN.to_string())
            .build()
            .map_err(|e| tokenizer_error("Word-level model build failed", e))?;

        let mut inner = tokenizers::Tokenizer::new(model);
        inner
            .with_pre_tokenizer(Some(Whitespace::default()))
            .with_post_processor(Some(BertProcessing::new(
                (SEP_TOKEN.to_string(), sep),
                (CLS_TOKEN.to_string(), cls),
            )));
        register_special(&mut inner, &BASE_SPECIAL);

        Ok(Self {
            special: special_contents(&inner),
            inner,
            max_seq_length,
        })
    }
}

/// Words of `text` as split by the whitespace pre-tokenizer
fn pre_tokenize(text: &str) -> Result<Vec<String>> {
    let mut pre = PreTokenizedString::from(text);
    Whitespace::default()
        .pre_tokenize(&mut pre)
        .map_err(|e| tokenizer_error("Pre-tokenization failed", e))?;
    Ok(pre
        .get_splits(OffsetReferential::Original, OffsetType::Char)
        .into_iter()
        .map(|(word, _, _)| word.to_string())
        .collect())
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str, truncation: bool) -> Result<Encoding> {
        encode_pipeline(&self.inner, text, truncation, self.max_seq_length)
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    fn id_to_token(&self, id: u32) -> Option<String> {
        self.inner.id_to_token(id)
    }

    fn is_special_token(&self, text: &str) -> bool {
        self.special.contains(text)
    }

    fn pad_id(&self) -> u32 {
        self.inner.token_to_id(PAD_TOKEN).unwrap_or(0)
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }
}

// ============================================================================
// Hugging Face Tokenizer
// ============================================================================

/// Pretrained `tokenizer.json` tokenizer
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    special: HashSet<String>,
    pad_id: u32,
    max_seq_length: usize,
}

impl HfTokenizer {
    /// Load `tokenizer.json`, registering `extra_special` (entity markers)
    pub fn from_file(
        path: impl AsRef<Path>,
        max_seq_length: usize,
        extra_special: &[String],
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| tokenizer_error(&format!("Tokenizer load failed at {}", path.display()), e))?;

        if !extra_special.is_empty() {
            let count = register_special(&mut inner, extra_special);
            tracing::debug!("Registered {} entity marker tokens", count);
        }

        let pad_id = inner
            .get_padding()
            .map(|p| p.pad_id)
            .or_else(|| inner.token_to_id(PAD_TOKEN))
            .unwrap_or(0);

        Ok(Self {
            special: special_contents(&inner),
            inner,
            pad_id,
            max_seq_length,
        })
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str, truncation: bool) -> Result<Encoding> {
        encode_pipeline(&self.inner, text, truncation, self.max_seq_length)
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    fn id_to_token(&self, id: u32) -> Option<String> {
        self.inner.id_to_token(id)
    }

    fn is_special_token(&self, text: &str) -> bool {
        self.special.contains(text)
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_are_characters() {
        let tokenizer = WordTokenizer::from_corpus(["fièvre après aspirine."], 64).unwrap();
        let encoding = tokenizer.encode("fièvre après aspirine.", false).unwrap();

        assert_eq!(
            encoding.tokens,
            vec!["[CLS]", "fièvre", "après", "aspirine", ".", "[SEP]"]
        );
        assert_eq!(encoding.offsets[2], (7, 12));
        assert_eq!(encoding.offsets[4], (21, 22));
        assert_eq!(encoding.offsets[0], (0, 0));
    }

    #[test]
    fn test_punctuation_split_from_words() {
        let tokenizer = WordTokenizer::from_corpus(["aspirin-induced rash (mild)"], 64).unwrap();
        let encoding = tokenizer.encode("aspirin-induced rash (mild)", false).unwrap();

        assert_eq!(
            encoding.tokens,
            vec!["[CLS]", "aspirin", "-", "induced", "rash", "(", "mild", ")", "[SEP]"]
        );
        assert_eq!(encoding.offsets[3], (8, 15));
    }

    #[test]
    fn test_special_tokens_stay_whole() {
        let mut tokenizer = WordTokenizer::from_corpus(["rash after aspirin"], 64).unwrap();
        tokenizer.add_special_tokens(&["[s1]", "[e1]"]);

        let encoding = tokenizer.encode("[s1] rash [e1] after", false).unwrap();
        assert_eq!(encoding.tokens[1], "[s1]");
        assert_eq!(encoding.tokens[3], "[e1]");
        assert!(tokenizer.is_special_token("[s1]"));
        assert!(tokenizer.is_special_token(CLS_TOKEN));
        assert!(!tokenizer.is_special_token("rash"));
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let tokenizer = WordTokenizer::from_corpus(["rash"], 64).unwrap();
        let encoding = tokenizer.encode("rash hives", false).unwrap();

        assert_eq!(encoding.ids[2], tokenizer.token_to_id(UNK_TOKEN).unwrap());
    }

    #[test]
    fn test_truncation_keeps_sep() {
        let text = "a b c d e f g h";
        let tokenizer = WordTokenizer::from_corpus([text], 5).unwrap();

        let full = tokenizer.encode(text, false).unwrap();
        let cut = tokenizer.encode(text, true).unwrap();

        assert_eq!(full.len(), 10);
        assert_eq!(cut.len(), 5);
        assert_eq!(cut.tokens.last().map(String::as_str), Some(SEP_TOKEN));
        assert_eq!(cut.tokens[3], "c");
    }

    #[test]
    fn test_token_at_char_skips_special_tokens() {
        let tokenizer = WordTokenizer::from_corpus(["rash after aspirin"], 64).unwrap();
        let encoding = tokenizer.encode("rash after aspirin", false).unwrap();

        assert_eq!(encoding.token_at_char(0), Some(1));
        assert_eq!(encoding.token_at_char(4), None);
        assert_eq!(encoding.token_at_char(11), Some(3));
        assert_eq!(encoding.token_at_char(40), None);
    }

    #[test]
    fn test_token_at_char_after_punctuation() {
        let tokenizer = WordTokenizer::from_corpus(["pain (aspirin) noted"], 64).unwrap();
        let encoding = tokenizer.encode("pain (aspirin) noted", false).unwrap();

        // "(" spans [5, 6); "aspirin" starts at 6
        assert_eq!(encoding.tokens[2], "(");
        assert_eq!(encoding.token_at_char(6), Some(3));
        assert_eq!(encoding.token_at_char(5), Some(2));
    }

    #[test]
    fn test_token_ending_at() {
        let tokenizer = WordTokenizer::from_corpus(["pain (aspirin) noted"], 64).unwrap();
        let encoding = tokenizer.encode("pain (aspirin) noted", false).unwrap();

        assert_eq!(encoding.token_ending_at(4), Some(1));
        // closes "aspirin", not the ")" starting at 13
        assert_eq!(encoding.token_ending_at(13), Some(3));
        assert_eq!(encoding.token_ending_at(0), None);
    }

    #[test]
    fn test_convert_round_trip() {
        let tokenizer = WordTokenizer::from_corpus(["rash after aspirin"], 64).unwrap();
        let ids = tokenizer
            .convert_tokens_to_ids(&["rash".to_string(), "aspirin".to_string()])
            .unwrap();
        let tokens = tokenizer.convert_ids_to_tokens(&ids).unwrap();

        assert_eq!(tokens, vec!["rash", "aspirin"]);
        assert!(tokenizer
            .convert_tokens_to_ids(&["hives".to_string()])
            .is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");

        let mut tokenizer = WordTokenizer::from_corpus(["rash after aspirin"], 32).unwrap();
        tokenizer.add_special_tokens(&["[s1]"]);
        tokenizer.save(&path).unwrap();

        let loaded = WordTokenizer::from_file(&path).unwrap();
        assert_eq!(loaded.vocab_size(), tokenizer.vocab_size());
        assert_eq!(loaded.token_to_id("aspirin"), tokenizer.token_to_id("aspirin"));
        assert!(loaded.is_special_token("[s1]"));
        assert_eq!(loaded.max_seq_length(), 32);
        assert_eq!(
            loaded.encode("[s1] rash", false).unwrap(),
            tokenizer.encode("[s1] rash", false).unwrap()
        );
    }
}
