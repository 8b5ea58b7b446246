//! Pipeline stages for image-to-LaTeX recognition.
//!
//! Each submodule implements exactly one transformation step and is
//! independently testable. Model calls go through
//! [`crate::model::ModelSession`], so every stage runs against mock
//! sessions in tests.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ resize ──▶ encode ──▶ decode ──▶ detokenize ──▶ postprocess ──▶ render
//! (bytes)   (tensor)     (width     (context)  (ids)      (text)         (LaTeX)         (preview)
//!                         search)
//! ```
//!
//! 1. [`input`]       read a path, URL or stdin into bytes
//! 2. [`normalize`]   decode, composite, bound, pad to the 32-px grid,
//!    grayscale and normalise; runs in `spawn_blocking`
//! 3. [`resize`]      shrink to the width the resizer model prefers
//! 4. [`encode`]      one encoder call producing the decoder context
//! 5. [`decode`]      greedy autoregressive generation with cancellation
//! 6. [`detokenize`]  ids to text through the vocabulary
//! 7. [`postprocess`] deterministic whitespace cleanup
//! 8. [`render`]      preview markup with a non-fatal fallback

pub mod decode;
pub mod detokenize;
pub mod encode;
pub mod input;
pub mod normalize;
pub mod postprocess;
pub mod render;
pub mod resize;
