//! The recognition host: owns the models and drives the pipeline.
//!
//! A [`LatexOcr`] runs at most one prediction at a time. A second request
//! while one is in flight fails fast with [`OcrError::Busy`] instead of
//! queueing. Progress is published on the status channel and the running
//! prediction can be cancelled cooperatively through a [`CancelHandle`].
//!
//! ```rust,no_run
//! use img2latex::{LatexOcr, RecognitionConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ocr = LatexOcr::load(RecognitionConfig::default()).await?;
//! let output = ocr.recognize("equation.png").await?;
//! println!("{}", output.latex);
//! # Ok(())
//! # }
//! ```

use crate::config::RecognitionConfig;
use crate::error::OcrError;
use crate::model::ModelSessions;
use crate::output::{RecognitionOutput, RecognitionStats};
use crate::pipeline::decode::{DecodeOutcome, GreedyDecoder};
use crate::pipeline::render::{render_preview, DelimitedRenderer, MathRenderer};
use crate::pipeline::{detokenize, encode, input, normalize, postprocess, resize};
use crate::status::{CancelHandle, PipelinePhase, PipelineState, PipelineStatus, StatusReceiver};
use crate::vocab::Vocabulary;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

/// Image-to-LaTeX recogniser.
pub struct LatexOcr {
    sessions: ModelSessions,
    vocabulary: Vocabulary,
    config: RecognitionConfig,
    renderer: Arc<dyn MathRenderer>,
    state: PipelineState,
}

impl LatexOcr {
    /// Fetch the four assets, evict stale cache generations and build ONNX
    /// Runtime sessions.
    #[cfg(feature = "onnx")]
    pub async fn load(config: RecognitionConfig) -> Result<Self, OcrError> {
        use crate::assets::{fetch_asset, AssetCache};
        use crate::error::ModelRole;
        use crate::model::ModelSession;
        use crate::onnx::OrtModelSession;

        let load_start = Instant::now();
        let cache = AssetCache::from_config(&config);
        if let Err(e) = cache.evict_stale().await {
            warn!("Model cache eviction failed: {}", e);
        }

        let models = config.models.clone();
        let timeout = config.download_timeout_secs;
        info!("Loading models from {}", models.encoder);
        let (resizer, encoder, decoder, tokenizer) = tokio::try_join!(
            fetch_asset(&models.resizer, &cache, timeout),
            fetch_asset(&models.encoder, &cache, timeout),
            fetch_asset(&models.decoder, &cache, timeout),
            fetch_asset(&models.tokenizer, &cache, timeout),
        )?;
        let vocabulary = Vocabulary::from_bytes(&tokenizer)?;
        vocabulary.check_reserved(&[config.bos_token, config.eos_token, config.pad_token])?;

        let threads = config.intra_threads;
        let sessions = tokio::task::spawn_blocking(move || -> Result<ModelSessions, OcrError> {
            let build = |role, source: &str, bytes: &[u8]| -> Result<Arc<dyn ModelSession>, OcrError> {
                Ok(Arc::new(OrtModelSession::from_bytes(role, source, bytes, threads)?))
            };
            Ok(ModelSessions::new(
                build(ModelRole::Resizer, &models.resizer, &resizer)?,
                build(ModelRole::Encoder, &models.encoder, &encoder)?,
                build(ModelRole::Decoder, &models.decoder, &decoder)?,
            ))
        })
        .await
        .map_err(|e| OcrError::Internal(format!("model load task failed: {e}")))??;

        info!(
            "Models ready in {}ms ({} vocabulary entries)",
            load_start.elapsed().as_millis(),
            vocabulary.len()
        );
        Ok(Self::from_parts(sessions, vocabulary, config))
    }

    /// Assemble a recogniser from already-loaded parts.
    pub fn from_parts(sessions: ModelSessions, vocabulary: Vocabulary, config: RecognitionConfig) -> Self {
        Self {
            sessions,
            vocabulary,
            config,
            renderer: Arc::new(DelimitedRenderer),
            state: PipelineState::new(),
        }
    }

    /// Replace the preview renderer.
    pub fn with_renderer(mut self, renderer: impl MathRenderer + 'static) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// A new reader of the status channel.
    pub fn status(&self) -> StatusReceiver {
        self.state.subscribe()
    }

    /// Status updates as a `Stream`, starting with the current value.
    pub fn status_stream(&self) -> WatchStream<PipelineStatus> {
        self.state.stream()
    }

    pub fn current_status(&self) -> PipelineStatus {
        self.state.current()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.state.cancel_handle()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Resolve a path, URL or `-` and recognise the image.
    pub async fn recognize(&self, input_str: impl AsRef<str>) -> Result<RecognitionOutput, OcrError> {
        let input_str = input_str.as_ref();
        info!("Recognising {}", input_str);
        let bytes = input::resolve_image(input_str, self.config.download_timeout_secs).await?;
        self.predict(bytes).await
    }

    /// Recognise and write the LaTeX to `output_path`.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn recognize_to_file(
        &self,
        input_str: impl AsRef<str>,
        output_path: impl AsRef<Path>,
    ) -> Result<RecognitionOutput, OcrError> {
        let input_str = input_str.as_ref();
        info!("Recognising {}", input_str);
        let bytes = input::resolve_image(input_str, self.config.download_timeout_secs).await?;
        self.predict_to_file(bytes, output_path).await
    }

    /// [`predict`](Self::predict) on already-resolved bytes, then write the
    /// LaTeX to `output_path` atomically.
    pub async fn predict_to_file(
        &self,
        bytes: Vec<u8>,
        output_path: impl AsRef<Path>,
    ) -> Result<RecognitionOutput, OcrError> {
        let output = self.predict(bytes).await?;
        let path = output_path.as_ref();
        let write_err = |source| OcrError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp_path = path.with_extension("tex.tmp");
        tokio::fs::write(&tmp_path, format!("{}\n", output.latex))
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

        Ok(output)
    }

    /// Run the full pipeline on encoded image bytes.
    ///
    /// # Errors
    /// * [`OcrError::Busy`] if another prediction is running
    /// * [`OcrError::Cancelled`] if the cancel handle was used
    /// * [`OcrError::ImageDecode`], [`OcrError::ModelInference`],
    ///   [`OcrError::TokenLookup`] for pipeline faults
    ///
    /// A preview that cannot be rendered is not an error; see
    /// [`RecognitionOutput::render_error`].
    pub async fn predict(&self, bytes: Vec<u8>) -> Result<RecognitionOutput, OcrError> {
        if !self.state.begin() {
            return Err(OcrError::Busy);
        }
        let mut claim = Claim {
            state: &self.state,
            released: false,
        };

        let result = self.run_pipeline(bytes).await;
        match &result {
            Ok(out) => {
                info!(
                    "Recognised {} chars in {}ms",
                    out.latex.len(),
                    out.stats.total_ms
                );
                self.state.finish();
            }
            Err(e) if e.is_cancelled() => {
                info!("Prediction cancelled");
                self.state.finish();
            }
            Err(e) => {
                warn!("Prediction failed: {}", e);
                self.state.fail(e.status_message());
            }
        }
        claim.released = true;
        result
    }

    async fn run_pipeline(&self, bytes: Vec<u8>) -> Result<RecognitionOutput, OcrError> {
        let total_start = Instant::now();
        let config = &self.config;
        let state = &self.state;
        let mut stats = RecognitionStats::default();

        // ── Step 1: Normalise ────────────────────────────────────────────
        state.set_phase(PipelinePhase::Resizing, 0);
        let step_start = Instant::now();
        let prepared = normalize::prepare_image(bytes, config).await?;
        stats.normalize_ms = elapsed_ms(step_start);
        (stats.input_width, stats.input_height) = prepared.source_dims;

        // ── Step 2: Width search ─────────────────────────────────────────
        let step_start = Instant::now();
        let search = resize::search_width(prepared, &*self.sessions.resizer, config, state).await?;
        stats.resize_ms = elapsed_ms(step_start);
        stats.resize_iterations = search.iterations;
        stats.resize_converged = search.converged;
        stats.widths = search.widths;
        stats.final_width = search.image.width();
        stats.final_height = search.image.height();
        debug!(
            "Width search: {} iterations, final {}x{}",
            stats.resize_iterations, stats.final_width, stats.final_height
        );
        if state.is_cancelled() {
            return Err(OcrError::Cancelled);
        }

        // ── Step 3: Encode ───────────────────────────────────────────────
        state.set_phase(PipelinePhase::Encoding, 0);
        let step_start = Instant::now();
        let context = encode::encode_image(&search.image.tensor, &*self.sessions.encoder).await?;
        stats.encode_ms = elapsed_ms(step_start);
        if state.is_cancelled() {
            return Err(OcrError::Cancelled);
        }

        // ── Step 4: Decode ───────────────────────────────────────────────
        let step_start = Instant::now();
        let outcome = GreedyDecoder::new(&*self.sessions.decoder, &context, config)
            .run(state)
            .await?;
        stats.decode_ms = elapsed_ms(step_start);
        let sequence = match outcome {
            DecodeOutcome::Done {
                sequence,
                stop,
                steps,
            } => {
                stats.decode_steps = steps;
                stats.stop_reason = Some(stop);
                sequence
            }
            DecodeOutcome::Aborted { .. } => return Err(OcrError::Cancelled),
        };
        if stats.truncated() {
            warn!("Output truncated at {} tokens", config.max_seq_len);
        }

        // ── Step 5: Text and preview ─────────────────────────────────────
        let raw_text = detokenize::detokenize(sequence.ids(), &self.vocabulary)?;
        let latex = postprocess::postprocess(&raw_text);
        let (preview, render_error) = render_preview(self.renderer.as_ref(), &latex, config.render_mode);

        stats.total_ms = elapsed_ms(total_start);
        Ok(RecognitionOutput {
            latex,
            raw_text,
            tokens: sequence.into_ids(),
            preview,
            render_error,
            stats,
        })
    }
}

/// Releases the pipeline if a prediction future is dropped mid-flight.
struct Claim<'a> {
    state: &'a PipelineState,
    released: bool,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.state.finish();
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Synchronous wrapper: load the models and recognise one input.
///
/// Creates a temporary tokio runtime internally.
#[cfg(feature = "onnx")]
pub fn recognize_sync(input_str: impl AsRef<str>, config: &RecognitionConfig) -> Result<RecognitionOutput, OcrError> {
    let input_str = input_str.as_ref();
    tokio::runtime::Runtime::new()
        .map_err(|e| OcrError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(async {
            let ocr = LatexOcr::load(config.clone()).await?;
            ocr.recognize(input_str).await
        })
}
