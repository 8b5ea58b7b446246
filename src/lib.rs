//! # img2latex
//!
//! Recognise an image of a mathematical expression and return LaTeX.
//!
//! Three exported neural models do the work: a *resizer* that picks the
//! width the encoder reads best at, an *encoder* that turns the image into a
//! context tensor, and a *decoder* that generates tokens one at a time. This
//! crate wraps them in a cancellable, observable pipeline.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image bytes
//!  │
//!  ├─ 1. Normalise   decode, white background, fit 672×192, pad to 32 px, gray
//!  ├─ 2. Resize      ≤10 resizer calls shrinking the width (cancel checkpoint)
//!  ├─ 3. Encode      one encoder call → context             (cancel checkpoint)
//!  ├─ 4. Decode      greedy argmax until EOS or 512 tokens  (cancel after each)
//!  ├─ 5. Detokenise  ids → text via the vocabulary
//!  ├─ 6. Polish      whitespace collapse to a fixed point
//!  └─ 7. Preview     render markup, or a fixed fallback message
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use img2latex::{LatexOcr, RecognitionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ocr = LatexOcr::load(RecognitionConfig::default()).await?;
//!     let output = ocr.recognize("equation.png").await?;
//!     println!("{}", output.latex);
//!     eprintln!("{} tokens in {}ms", output.stats.decode_steps, output.stats.total_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `onnx`  | on      | ONNX Runtime sessions and [`LatexOcr::load`] |
//! | `cli`   | on      | Enables the `img2latex` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! With `default-features = false` the pipeline still works through
//! [`LatexOcr::from_parts`] and any [`ModelSession`] implementation.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assets;
pub mod config;
pub mod error;
pub mod model;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod output;
pub mod pipeline;
pub mod recognize;
pub mod status;
pub mod vocab;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ModelSources, RecognitionConfig, RecognitionConfigBuilder};
pub use error::{ModelRole, OcrError, RenderError};
pub use model::{ModelSession, ModelSessions, NamedTensor, SessionError, TensorData};
pub use output::{RecognitionOutput, RecognitionStats};
pub use pipeline::render::{DelimitedRenderer, MathRenderer, RenderMode, RENDER_FALLBACK};
pub use recognize::LatexOcr;
#[cfg(feature = "onnx")]
pub use recognize::recognize_sync;
pub use status::{CancelHandle, PipelinePhase, PipelineStatus, StatusReceiver};
pub use vocab::Vocabulary;
