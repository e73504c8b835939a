//! Context windowing
//!
//! Cuts a bounded token window around an entity pair. The full document is
//! tokenized once by the caller; every pair re-tokenizes only its own
//! window, optionally with entity boundary markers spliced into the text.

use std::fmt;

use clinrel_core::text::{char_len, char_slice};
use clinrel_core::{ClinrelError, Encoding, GeneralConfig, Result, Tokenizer};

/// Default entity boundary markers for tagged delimited exports
pub const DEFAULT_SCHEMA_TAGS: [&str; 4] = ["[s1]", "[e1]", "[s2]", "[e2]"];

// ============================================================================
// Schema Tags
// ============================================================================

/// Entity boundary markers: entity-1 start/end, entity-2 start/end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaTags {
    pub texts: [String; 4],
    pub ids: [u32; 4],
}

impl SchemaTags {
    /// Resolve marker strings against the tokenizer vocabulary
    ///
    /// Returns `None` for an empty list. Markers must be in the vocabulary
    /// and must not share id 0 with padding/special slots.
    pub fn resolve<S: AsRef<str>>(tags: &[S], tokenizer: &dyn Tokenizer) -> Result<Option<Self>> {
        if tags.is_empty() {
            return Ok(None);
        }
        if tags.len() != 4 {
            return Err(ClinrelError::Config(format!(
                "Expected 4 annotation schema tags, got {}",
                tags.len()
            )));
        }

        let mut texts: [String; 4] = Default::default();
        let mut ids = [0u32; 4];
        for (slot, tag) in tags.iter().enumerate() {
            let tag = tag.as_ref();
            let id = tokenizer.token_to_id(tag).ok_or_else(|| {
                ClinrelError::Config(format!("Annotation schema tag not in vocabulary: {tag}"))
            })?;
            if id == 0 {
                return Err(ClinrelError::Config(format!(
                    "Annotation schema tag {tag} maps to token id 0"
                )));
            }
            texts[slot] = tag.to_string();
            ids[slot] = id;
        }

        Ok(Some(Self { texts, ids }))
    }

    /// Token positions of the four markers in `encoding`
    fn locate(&self, encoding: &Encoding) -> std::result::Result<[usize; 4], WindowRejection> {
        let mut positions = [0usize; 4];
        for (slot, &id) in self.ids.iter().enumerate() {
            match encoding.position_of(id) {
                Some(pos) if pos > 0 => positions[slot] = pos,
                _ => return Err(WindowRejection::MarkerMissing(self.texts[slot].clone())),
            }
        }
        Ok(positions)
    }
}

// ============================================================================
// Window Types
// ============================================================================

/// Character span of an entity mention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A bounded token sequence around one entity pair
#[derive(Debug, Clone, PartialEq)]
pub struct TokenWindow {
    pub token_ids: Vec<u32>,

    /// Token index of entity 1 and entity 2 (their start markers when tagged)
    pub entity_positions: (usize, usize),

    pub entity1_text: String,
    pub entity2_text: String,

    /// Entity 1 start/end and entity 2 start/end in window characters
    pub char_offsets: [usize; 4],
}

/// Why a pair produced no window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowRejection {
    /// Entity starts are farther apart than the window size
    TooFarApart { distance: usize, window_size: usize },

    /// No token covers the character position
    Untokenized(usize),

    /// A boundary marker did not survive truncation
    MarkerMissing(String),

    /// Marker splicing needs the mentions to be disjoint
    Overlapping,

    /// Both entities resolved to the same token or past the sequence end
    Collapsed { positions: (usize, usize), len: usize },

    Tokenizer(String),
}

impl fmt::Display for WindowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFarApart {
                distance,
                window_size,
            } => write!(f, "entities {distance} chars apart (window {window_size})"),
            Self::Untokenized(pos) => write!(f, "no token covers char {pos}"),
            Self::MarkerMissing(tag) => write!(f, "marker {tag} missing after truncation"),
            Self::Overlapping => write!(f, "entity mentions overlap"),
            Self::Collapsed { positions, len } => {
                write!(f, "entity positions {positions:?} invalid for {len} tokens")
            }
            Self::Tokenizer(msg) => write!(f, "tokenizer failed: {msg}"),
        }
    }
}

type WindowResult = std::result::Result<TokenWindow, WindowRejection>;

// ============================================================================
// Context Windower
// ============================================================================

/// Window geometry
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Maximum start-to-start character distance
    pub window_size: usize,
    /// Context tokens left of entity 1
    pub cntx_left: usize,
    /// Context tokens right of entity 2
    pub cntx_right: usize,
}

impl From<&GeneralConfig> for WindowConfig {
    fn from(general: &GeneralConfig) -> Self {
        Self {
            window_size: general.window_size,
            cntx_left: general.cntx_left,
            cntx_right: general.cntx_right,
        }
    }
}

/// Builds token windows around entity pairs
pub struct ContextWindower<'a> {
    tokenizer: &'a dyn Tokenizer,
    config: WindowConfig,
    tags: Option<SchemaTags>,
}

impl<'a> ContextWindower<'a> {
    pub fn new(tokenizer: &'a dyn Tokenizer, config: WindowConfig, tags: Option<SchemaTags>) -> Self {
        Self {
            tokenizer,
            config,
            tags,
        }
    }

    /// Build from the `[general]` config section
    pub fn from_config(tokenizer: &'a dyn Tokenizer, general: &GeneralConfig) -> Result<Self> {
        let tags = SchemaTags::resolve(general.annotation_schema_tags.as_slice(), tokenizer)?;
        Ok(Self::new(tokenizer, WindowConfig::from(general), tags))
    }

    pub fn tokenizer(&self) -> &'a dyn Tokenizer {
        self.tokenizer
    }

    pub fn schema_tags(&self) -> Option<&SchemaTags> {
        self.tags.as_ref()
    }

    /// Window two entity mentions of `text`
    ///
    /// `encoding` is the untruncated tokenization of the whole `text`;
    /// `e1` must start at or before `e2`.
    pub fn window(&self, text: &str, encoding: &Encoding, e1: CharSpan, e2: CharSpan) -> WindowResult {
        self.check_distance(e1.start, e2.start)?;

        let e1_token = encoding
            .token_at_char(e1.start)
            .ok_or(WindowRejection::Untokenized(e1.start))?;
        let e2_end_token = encoding
            .token_ending_at(e2.end)
            .ok_or(WindowRejection::Untokenized(e2.end))?;

        let text_len = char_len(text);
        let (left, right) = self.context_bounds(encoding, text_len, e1_token, e2_end_token);

        let entity1_text = char_slice(text, e1.start, e1.end).to_string();
        let entity2_text = char_slice(text, e2.start, e2.end).to_string();

        match &self.tags {
            Some(tags) => {
                if e1.end > e2.start {
                    return Err(WindowRejection::Overlapping);
                }
                let spliced = MarkerSplice::new(tags, e1, e2);
                let tagged_text = spliced.apply(text);
                let left = spliced.map_left(left);
                let right = spliced.map_right(right);
                let window_text = char_slice(&tagged_text, left, right);

                let window = self.encode(window_text)?;
                let markers = tags.locate(&window)?;
                let shifted = spliced.entity_offsets();
                let char_offsets = shifted.map(|p| p.saturating_sub(left));

                self.finish(window, (markers[0], markers[2]), entity1_text, entity2_text, char_offsets)
            }
            None => {
                let window_text = char_slice(text, left, right);
                let window = self.encode(window_text)?;

                let local = [e1.start, e1.end, e2.start, e2.end].map(|p| p.saturating_sub(left));
                let p1 = window
                    .token_at_char(local[0])
                    .ok_or(WindowRejection::Untokenized(e1.start))?;
                let p2 = window
                    .token_at_char(local[2])
                    .ok_or(WindowRejection::Untokenized(e2.start))?;

                self.finish(window, (p1, p2), entity1_text, entity2_text, local)
            }
        }
    }

    /// Window a text whose entities are already wrapped in markers
    pub fn window_tagged(&self, text: &str, encoding: &Encoding) -> WindowResult {
        let tags = self
            .tags
            .as_ref()
            .ok_or_else(|| WindowRejection::MarkerMissing("<no schema tags configured>".to_string()))?;

        let markers = tags.locate(encoding)?;
        let e1 = encoding.offsets[markers[0]];
        let e2 = encoding.offsets[markers[2]];
        self.check_distance(e1.0, e2.0)?;

        let entity1_text = char_slice(text, encoding.offsets[markers[0]].1, encoding.offsets[markers[1]].0)
            .trim()
            .to_string();
        let entity2_text = char_slice(text, encoding.offsets[markers[2]].1, encoding.offsets[markers[3]].0)
            .trim()
            .to_string();

        let (left, right) = self.context_bounds(encoding, char_len(text), markers[0], markers[3]);
        let window = self.encode(char_slice(text, left, right))?;
        let found = tags.locate(&window)?;

        let char_offsets = [
            window.offsets[found[0]].1,
            window.offsets[found[1]].0,
            window.offsets[found[2]].1,
            window.offsets[found[3]].0,
        ];
        self.finish(window, (found[0], found[2]), entity1_text, entity2_text, char_offsets)
    }

    fn check_distance(&self, start1: usize, start2: usize) -> std::result::Result<(), WindowRejection> {
        let distance = start1.abs_diff(start2);
        if distance > self.config.window_size {
            return Err(WindowRejection::TooFarApart {
                distance,
                window_size: self.config.window_size,
            });
        }
        Ok(())
    }

    /// Character bounds of the context window
    fn context_bounds(
        &self,
        encoding: &Encoding,
        text_len: usize,
        e1_token: usize,
        e2_end_token: usize,
    ) -> (usize, usize) {
        // special tokens carry empty spans and stand for the text edges
        let left = e1_token
            .checked_sub(self.config.cntx_left)
            .and_then(|idx| encoding.offsets.get(idx))
            .filter(|(start, end)| start < end)
            .map(|&(start, _)| start)
            .unwrap_or(0);

        let right = encoding
            .offsets
            .get(e2_end_token + self.config.cntx_right)
            .filter(|(start, end)| start < end)
            .map(|&(_, end)| end)
            .unwrap_or(text_len);

        if left > right {
            (right, left)
        } else {
            (left, right)
        }
    }

    fn encode(&self, window_text: &str) -> std::result::Result<Encoding, WindowRejection> {
        self.tokenizer
            .encode(window_text, true)
            .map_err(|e| WindowRejection::Tokenizer(e.to_string()))
    }

    fn finish(
        &self,
        window: Encoding,
        positions: (usize, usize),
        entity1_text: String,
        entity2_text: String,
        char_offsets: [usize; 4],
    ) -> WindowResult {
        let len = window.len();
        if positions.0 == positions.1 || positions.0 >= len || positions.1 >= len {
            return Err(WindowRejection::Collapsed { positions, len });
        }
        Ok(TokenWindow {
            token_ids: window.ids,
            entity_positions: positions,
            entity1_text,
            entity2_text,
            char_offsets,
        })
    }
}

// ============================================================================
// Marker Splicing
// ============================================================================

/// Inserts `" tag "` around both mentions and maps old offsets to new ones
struct MarkerSplice<'t> {
    tags: &'t SchemaTags,
    /// Insertion points in original characters: s1, e1, s2, e2
    points: [usize; 4],
    /// Inserted widths in characters
    widths: [usize; 4],
}

impl<'t> MarkerSplice<'t> {
    fn new(tags: &'t SchemaTags, e1: CharSpan, e2: CharSpan) -> Self {
        Self {
            tags,
            points: [e1.start, e1.end, e2.start, e2.end],
            widths: tags.texts.clone().map(|t| char_len(&t) + 2),
        }
    }

    fn apply(&self, text: &str) -> String {
        let [s1, e1, s2, e2] = self.points;
        let mut out = String::with_capacity(text.len() + self.widths.iter().sum::<usize>() * 4);
        let segments = [
            (0, s1),
            (s1, e1),
            (e1, s2),
            (s2, e2),
        ];
        for (slot, &(from, to)) in segments.iter().enumerate() {
            out.push_str(char_slice(text, from, to));
            out.push(' ');
            out.push_str(&self.tags.texts[slot]);
            out.push(' ');
        }
        out.push_str(char_slice(text, e2, char_len(text)));
        out
    }

    /// New position of a left bound; insertions at `pos` stay to its right
    fn map_left(&self, pos: usize) -> usize {
        pos + self
            .points
            .iter()
            .zip(self.widths)
            .filter(|(p, _)| **p < pos)
            .map(|(_, w)| w)
            .sum::<usize>()
    }

    /// New position of a right bound; insertions at `pos` stay to its left
    fn map_right(&self, pos: usize) -> usize {
        pos + self
            .points
            .iter()
            .zip(self.widths)
            .filter(|(p, _)| **p <= pos)
            .map(|(_, w)| w)
            .sum::<usize>()
    }

    /// Entity bounds in the spliced text
    fn entity_offsets(&self) -> [usize; 4] {
        let [s1, e1, s2, e2] = self.points;
        let [w0, w1, w2, _] = self.widths;
        [s1 + w0, e1 + w0, s2 + w0 + w1 + w2, e2 + w0 + w1 + w2]
    }
}

// ============================================================================
// Tests
// ============================================================================
