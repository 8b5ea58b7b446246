//! Error types for the img2latex library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`]: **Fatal**: the prediction cannot proceed at all (bad
//!   image bytes, a model fault, an id missing from the vocabulary, user
//!   cancellation). Returned as `Err(OcrError)` from every `predict*` /
//!   `recognize*` entry point. Partial state is discarded.
//!
//! * [`RenderError`]: **Non-fatal**: the recognised LaTeX could not be
//!   turned into preview markup. The text result is still returned; the
//!   error is stored in [`crate::output::RecognitionOutput`] and a fixed
//!   fallback string replaces the preview.
//!
//! No error is retried automatically. Every failure requires a new
//! prediction request.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which of the three models a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// Width-predictor model driving the adaptive width search.
    Resizer,
    /// Image encoder producing the context tensor.
    Encoder,
    /// Autoregressive token decoder.
    Decoder,
}

impl ModelRole {
    /// Human-readable capitalised role name, as shown in status messages.
    pub fn label(self) -> &'static str {
        match self {
            ModelRole::Resizer => "Resizer",
            ModelRole::Encoder => "Encoder",
            ModelRole::Decoder => "Decoder",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelRole::Resizer => "resizer",
            ModelRole::Encoder => "encoder",
            ModelRole::Decoder => "decoder",
        })
    }
}

/// All fatal errors returned by the img2latex library.
///
/// Preview failures use [`RenderError`] and are stored in
/// [`crate::output::RecognitionOutput`] rather than propagated here.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The input bytes could not be decoded as an image.
    #[error("Failed to decode image: {detail}")]
    ImageDecode { detail: String },

    /// A model invocation failed at runtime.
    #[error("{role} inference failed: {detail}")]
    ModelInference { role: ModelRole, detail: String },

    /// The decoder produced an id that has no vocabulary entry.
    #[error("Token id {id} is not in the vocabulary")]
    TokenLookup { id: i64 },

    /// The user cancelled the prediction; no partial result exists.
    #[error("Prediction cancelled")]
    Cancelled,

    /// A prediction was requested while another one was still running.
    #[error("A prediction is already running")]
    Busy,

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a usable file path or URL.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// HTTP URL was syntactically valid but the download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Asset errors ──────────────────────────────────────────────────────
    /// A model file could not be turned into an inference session.
    #[error("Failed to load {role} model from '{source_name}': {detail}")]
    ModelLoad {
        role: ModelRole,
        source_name: String,
        detail: String,
    },

    /// The vocabulary asset is missing, malformed or empty.
    #[error("Failed to load vocabulary: {0}")]
    VocabularyLoad(String),

    /// The on-disk model cache could not be read or written.
    #[error("Model cache error at '{path}': {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrError {
    /// Build a model-inference error for `role`.
    pub fn inference(role: ModelRole, detail: impl fmt::Display) -> Self {
        OcrError::ModelInference {
            role,
            detail: detail.to_string(),
        }
    }

    /// Short message published on the status channel when this error ends a
    /// prediction. Model faults get a role-specific "try again" hint.
    pub fn status_message(&self) -> String {
        match self {
            OcrError::ImageDecode { .. } => "Invalid image".to_string(),
            OcrError::ModelInference { role, .. } => format!("{} error. Try again", role.label()),
            OcrError::TokenLookup { .. } => "Unknown token produced. Try again".to_string(),
            OcrError::Cancelled => "Cancelled".to_string(),
            OcrError::Busy => "Busy".to_string(),
            other => other.to_string(),
        }
    }

    /// `true` when the error is the user-initiated abort rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OcrError::Cancelled)
    }
}

/// The rendered preview could not be produced.
///
/// Never fatal: the recognised text is kept and the preview is replaced by
/// [`crate::pipeline::render::RENDER_FALLBACK`].
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum RenderError {
    /// Nothing to render.
    #[error("empty expression")]
    Empty,

    /// A `}` closed a group that was never opened, or a `{` was never closed.
    #[error("unbalanced braces at byte {position}")]
    UnbalancedBraces { position: usize },

    /// `\left` and `\right` delimiters do not pair up.
    #[error("{left} \\left vs {right} \\right delimiters")]
    UnpairedDelimiters { left: usize, right: usize },

    /// A custom renderer rejected the expression.
    #[error("malformed expression: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resizer_status_message() {
        let e = OcrError::inference(ModelRole::Resizer, "bad shape");
        assert_eq!(e.status_message(), "Resizer error. Try again");
        assert!(e.to_string().contains("resizer"));
        assert!(e.to_string().contains("bad shape"));
    }

    #[test]
    fn decoder_status_message() {
        let e = OcrError::inference(ModelRole::Decoder, "oom");
        assert_eq!(e.status_message(), "Decoder error. Try again");
    }

    #[test]
    fn image_decode_status_message() {
        let e = OcrError::ImageDecode {
            detail: "not a png".into(),
        };
        assert_eq!(e.status_message(), "Invalid image");
        assert!(e.to_string().contains("not a png"));
    }

    #[test]
    fn token_lookup_display() {
        let e = OcrError::TokenLookup { id: 9001 };
        assert!(e.to_string().contains("9001"));
    }

    #[test]
    fn cancelled_is_cancelled() {
        assert!(OcrError::Cancelled.is_cancelled());
        assert!(!OcrError::Busy.is_cancelled());
    }

    #[test]
    fn render_error_display() {
        let e = RenderError::UnbalancedBraces { position: 4 };
        assert!(e.to_string().contains("byte 4"));
        let e = RenderError::UnpairedDelimiters { left: 2, right: 1 };
        assert!(e.to_string().contains("2"));
    }
}
