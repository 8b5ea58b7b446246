//! Bidirectional token vocabulary.
//!
//! Both directions are precomputed at load time so detokenisation is an
//! O(1) lookup per id. The asset is either a HuggingFace `tokenizer.json`
//! (the map lives at `model.vocab`) or a flat `{"token": id}` object.

use crate::error::OcrError;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Surface string of the begin-of-sequence marker.
pub const BOS_MARKER: &str = "[BOS]";
/// Surface string of the end-of-sequence marker.
pub const EOS_MARKER: &str = "[EOS]";
/// Surface string of the padding marker.
pub const PAD_MARKER: &str = "[PAD]";
/// Byte-level BPE word-boundary marker (`Ġ`), rendered as a space.
pub const WORD_BOUNDARY: char = '\u{0120}';

/// Immutable token ↔ id mapping.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    by_token: HashMap<String, i64>,
    by_id: HashMap<i64, String>,
}

impl Vocabulary {
    /// Build from `(token, id)` pairs. When several tokens share an id the
    /// first one seen keeps the reverse mapping.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let mut by_token = HashMap::new();
        let mut by_id = HashMap::new();
        for (token, id) in pairs {
            let token = token.into();
            by_id.entry(id).or_insert_with(|| token.clone());
            by_token.insert(token, id);
        }
        Self { by_token, by_id }
    }

    /// Parse a `tokenizer.json` document or a flat token → id object.
    pub fn from_tokenizer_json(json: &str) -> Result<Self, OcrError> {
        let root: Value = serde_json::from_str(json)
            .map_err(|e| OcrError::VocabularyLoad(format!("invalid JSON: {e}")))?;

        let map = match root.pointer("/model/vocab") {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(OcrError::VocabularyLoad(
                    "`model.vocab` is not an object".into(),
                ))
            }
            None => root.as_object().ok_or_else(|| {
                OcrError::VocabularyLoad("expected a JSON object of token → id".into())
            })?,
        };

        let mut pairs = Vec::with_capacity(map.len());
        for (token, id) in map {
            let id = id.as_i64().ok_or_else(|| {
                OcrError::VocabularyLoad(format!("token {token:?} has non-integer id {id}"))
            })?;
            pairs.push((token.clone(), id));
        }
        if pairs.is_empty() {
            return Err(OcrError::VocabularyLoad("vocabulary is empty".into()));
        }

        let vocab = Self::from_pairs(pairs);
        debug!("Loaded vocabulary with {} entries", vocab.len());
        Ok(vocab)
    }

    /// Parse raw asset bytes (UTF-8 JSON).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OcrError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| OcrError::VocabularyLoad(format!("not UTF-8: {e}")))?;
        Self::from_tokenizer_json(text)
    }

    pub fn token(&self, id: i64) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn id(&self, token: &str) -> Option<i64> {
        self.by_token.get(token).copied()
    }

    /// Fail unless every id in `reserved` has a surface string.
    pub fn check_reserved(&self, reserved: &[i64]) -> Result<(), OcrError> {
        match reserved.iter().find(|id| !self.by_id.contains_key(id)) {
            Some(id) => Err(OcrError::VocabularyLoad(format!("reserved id {id} has no entry"))),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}
