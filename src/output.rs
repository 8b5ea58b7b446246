//! Result types returned by [`crate::LatexOcr`].

use crate::error::RenderError;
use crate::pipeline::decode::StopReason;
use serde::Serialize;

/// Everything a successful prediction produces.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionOutput {
    /// Post-processed LaTeX.
    pub latex: String,
    /// Detokenised text before post-processing.
    pub raw_text: String,
    /// Generated ids, starting with BOS.
    pub tokens: Vec<i64>,
    /// Preview markup, or the fallback message when rendering failed.
    pub preview: String,
    /// Why the preview is the fallback, if it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_error: Option<RenderError>,
    pub stats: RecognitionStats,
}

impl RecognitionOutput {
    /// `true` when the preview could be rendered.
    pub fn preview_ok(&self) -> bool {
        self.render_error.is_none()
    }
}

/// Timing and shape information for one prediction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecognitionStats {
    /// Decoded input size before normalisation.
    pub input_width: u32,
    pub input_height: u32,
    /// Width after normalisation, then after each shrink step.
    pub widths: Vec<u32>,
    /// Resizer invocations.
    pub resize_iterations: usize,
    /// `false` when the width search stopped at the iteration cap.
    pub resize_converged: bool,
    /// Final tensor size handed to the encoder.
    pub final_width: u32,
    pub final_height: u32,
    /// Decoder invocations.
    pub decode_steps: usize,
    /// `None` only in a default-constructed value.
    pub stop_reason: Option<StopReason>,
    pub normalize_ms: u64,
    pub resize_ms: u64,
    pub encode_ms: u64,
    pub decode_ms: u64,
    pub total_ms: u64,
}

impl RecognitionStats {
    /// `true` when generation hit `max_seq_len` and the text may be cut off.
    pub fn truncated(&self) -> bool {
        self.stop_reason == Some(StopReason::LengthLimit)
    }
}
