//! Token ids → raw text.

use crate::error::OcrError;
use crate::vocab::{Vocabulary, BOS_MARKER, EOS_MARKER, PAD_MARKER, WORD_BOUNDARY};

/// Map each id through the vocabulary, concatenate, turn word-boundary
/// markers into spaces, drop special markers and trim.
///
/// An id with no vocabulary entry fails the whole prediction.
pub fn detokenize(ids: &[i64], vocab: &Vocabulary) -> Result<String, OcrError> {
    let mut text = String::new();
    for &id in ids {
        let token = vocab.token(id).ok_or(OcrError::TokenLookup { id })?;
        text.push_str(token);
    }

    let text = text
        .replace(WORD_BOUNDARY, " ")
        .replace(EOS_MARKER, "")
        .replace(BOS_MARKER, "")
        .replace(PAD_MARKER, "");
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        Vocabulary::from_pairs([
            ("[PAD]", 0),
            ("[BOS]", 1),
            ("[EOS]", 2),
            ("x", 3),
            ("^", 4),
            ("{", 5),
            ("2", 6),
            ("}", 7),
            ("\u{0120}+", 8),
            ("\u{0120}y", 9),
        ])
    }

    #[test]
    fn strips_markers_and_maps_boundaries() {
        let text = detokenize(&[1, 3, 4, 5, 6, 7, 8, 9, 2], &vocab()).unwrap();
        assert_eq!(text, "x^{2} + y");
    }

    #[test]
    fn only_markers_is_empty() {
        assert_eq!(detokenize(&[1, 2], &vocab()).unwrap(), "");
        assert_eq!(detokenize(&[1, 0, 0], &vocab()).unwrap(), "");
    }

    #[test]
    fn unknown_id_fails() {
        let err = detokenize(&[1, 3, 404], &vocab()).unwrap_err();
        assert!(matches!(err, OcrError::TokenLookup { id: 404 }));
    }

    #[test]
    fn reserved_markers_vanish_around_content() {
        let vocab = Vocabulary::from_pairs([("[BOS]", 1), ("x", 5), ("=", 7), ("[EOS]", 2)]);
        assert_eq!(detokenize(&[1, 5, 7, 2], &vocab).unwrap(), "x=");
    }

    #[test]
    fn leading_boundary_is_trimmed() {
        assert_eq!(detokenize(&[1, 9, 2], &vocab()).unwrap(), "y");
    }
}
