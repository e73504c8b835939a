//! Character-offset helpers
//!
//! Annotation offsets count Unicode scalar values, not bytes.

/// Number of characters in `text`
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte index of the character at `char_idx` (clamped to the end of `text`)
pub fn byte_index(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

/// Slice `text` by character offsets, clamping out-of-range bounds
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    if start >= end {
        return "";
    }
    let from = byte_index(text, start);
    let to = byte_index(text, end);
    &text[from..to]
}

/// Lowercase without changing the character count
///
/// Characters whose lowercase form expands keep only its first character,
/// so annotation offsets stay valid.
pub fn lowercase_in_place(text: &str) -> String {
    text.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_slice_ascii() {
        assert_eq!(char_slice("chest pain", 6, 10), "pain");
        assert_eq!(char_slice("chest pain", 6, 99), "pain");
        assert_eq!(char_slice("chest pain", 5, 5), "");
    }

    #[test]
    fn test_char_slice_multibyte() {
        // "é" is two bytes but one character
        let text = "fièvre élevée";
        assert_eq!(char_len(text), 13);
        assert_eq!(char_slice(text, 7, 13), "élevée");
    }

    #[test]
    fn test_lowercase_keeps_offsets() {
        let text = "İbuprofen Rash";
        let lower = lowercase_in_place(text);
        assert_eq!(char_len(&lower), char_len(text));
        assert_eq!(char_slice(&lower, 10, 14), "rash");
    }
}
