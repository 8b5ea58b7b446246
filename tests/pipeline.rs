//! Integration tests for the full recognition pipeline.
//!
//! The three models are replaced by in-memory `ModelSession`s, so these tests
//! need no model files and no network. Images are synthetic PNGs.
//!
//! Run with:
//!   cargo test --test pipeline

use futures::future::BoxFuture;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use img2latex::{
    LatexOcr, ModelRole, ModelSession, ModelSessions, NamedTensor, OcrError, PipelinePhase, RecognitionConfig,
    RenderError, SessionError, Vocabulary, RENDER_FALLBACK,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;

// ── Test helpers ─────────────────────────────────────────────────────────────

const VOCAB_SIZE: usize = 16;
const EOS: usize = 2;

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut img = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    // A dark bar so the image is not uniform.
    for x in width / 4..width * 3 / 4 {
        img.put_pixel(x, height / 2, Rgba([0, 0, 0, 255]));
    }
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("png encode");
    buf
}

fn vocabulary() -> Vocabulary {
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

/// Resizer that predicts `target` while the image is wider, else the
/// current width.
fn resizer_towards(target: u32) -> impl Fn(Vec<NamedTensor>) -> Result<Vec<NamedTensor>, SessionError> {
    move |inputs: Vec<NamedTensor>| {
        let width = inputs[0].dims[3] as u32;
        let predicted = width.min(target);
        let mut logits = vec![0.0; 21];
        logits[(predicted / 32 - 1) as usize] = 1.0;
        Ok(vec![NamedTensor::f32("output", vec![1, 21], logits)?])
    }
}

fn encoder() -> impl Fn(Vec<NamedTensor>) -> Result<Vec<NamedTensor>, SessionError> {
    |inputs: Vec<NamedTensor>| {
        assert_eq!(inputs[0].name, "input");
        assert_eq!(inputs[0].dims[3] % 32, 0);
        Ok(vec![NamedTensor::f32("output", vec![1, 2, 4], vec![0.5; 8])?])
    }
}

fn logits_for(id: usize, len: usize) -> Result<NamedTensor, SessionError> {
    let mut data = vec![0.0; len * VOCAB_SIZE];
    data[(len - 1) * VOCAB_SIZE + id] = 8.0;
    NamedTensor::f32("output", vec![1, len as i64, VOCAB_SIZE as i64], data)
}

/// Decoder that emits `script[step]`, then EOS.
fn scripted(script: Vec<usize>) -> impl Fn(Vec<NamedTensor>) -> Result<Vec<NamedTensor>, SessionError> {
    move |inputs: Vec<NamedTensor>| {
        let len = inputs[0].dims[1] as usize;
        let id = script.get(len - 1).copied().unwrap_or(EOS);
        Ok(vec![logits_for(id, len)?])
    }
}

fn ocr_with(resizer: impl ModelSession + 'static, decoder: impl ModelSession + 'static) -> LatexOcr {
    ocr_with_config(resizer, decoder, RecognitionConfig::default())
}

fn ocr_with_config(
    resizer: impl ModelSession + 'static,
    decoder: impl ModelSession + 'static,
    config: RecognitionConfig,
) -> LatexOcr {
    let sessions = ModelSessions::new(Arc::new(resizer), Arc::new(encoder()), Arc::new(decoder));
    LatexOcr::from_parts(sessions, vocabulary(), config)
}

/// Decoder whose every call waits for a permit.
struct GatedDecoder {
    gate: Arc<Semaphore>,
}

impl ModelSession for GatedDecoder {
    fn run(&self, inputs: Vec<NamedTensor>) -> BoxFuture<'_, Result<Vec<NamedTensor>, SessionError>> {
        Box::pin(async move {
            self.gate
                .acquire()
                .await
                .map_err(|e| SessionError::new(e.to_string()))?
                .forget();
            let len = inputs[0].dims[1] as usize;
            Ok(vec![logits_for(EOS, len)?])
        })
    }
}

// ── Success path ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn recognises_tokenised_expression() {
    let ocr = ocr_with(resizer_towards(672), scripted(vec![3, 4, 5, 6, 7, 8, 9]));

    let out = ocr.predict(png(120, 40)).await.unwrap();

    assert_eq!(out.tokens, vec![1, 3, 4, 5, 6, 7, 8, 9, 2]);
    assert_eq!(out.raw_text, "x^{2} + y");
    assert_eq!(out.latex, "x^{2}+y");
    assert_eq!(out.preview, "$$\nx^{2}+y\n$$");
    assert!(out.preview_ok());
    assert_eq!(out.stats.decode_steps, 8);
    assert!(!out.stats.truncated());
    assert_eq!((out.stats.input_width, out.stats.input_height), (120, 40));
    assert_eq!((out.stats.final_width, out.stats.final_height), (128, 64));

    let status = ocr.current_status();
    assert_eq!(status.phase, PipelinePhase::Idle);
    assert_eq!(status.to_string(), "Ready");
    assert!(!ocr.is_running());
}

#[tokio::test]
async fn width_search_shrinks_before_encoding() {
    let encoded_width = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&encoded_width);
    let encoder = move |inputs: Vec<NamedTensor>| -> Result<Vec<NamedTensor>, SessionError> {
        seen.store(inputs[0].dims[3] as usize, Ordering::SeqCst);
        Ok(vec![NamedTensor::f32("output", vec![1, 1], vec![0.0])?])
    };
    let sessions = ModelSessions::new(
        Arc::new(resizer_towards(256)),
        Arc::new(encoder),
        Arc::new(scripted(vec![3])),
    );
    let ocr = LatexOcr::from_parts(sessions, vocabulary(), RecognitionConfig::default());

    let out = ocr.predict(png(1000, 100)).await.unwrap();

    assert_eq!(out.stats.widths, vec![672, 256]);
    assert_eq!(out.stats.resize_iterations, 2);
    assert!(out.stats.resize_converged);
    assert_eq!(encoded_width.load(Ordering::SeqCst), 256);
    assert_eq!(out.stats.final_height % 32, 0);
    assert_eq!(out.latex, "x");
}

#[tokio::test]
async fn width_search_reports_iteration_cap() {
    // Always one bucket narrower than the current width.
    let resizer = |inputs: Vec<NamedTensor>| -> Result<Vec<NamedTensor>, SessionError> {
        let width = inputs[0].dims[3] as u32;
        let mut logits = vec![0.0; 21];
        logits[(width / 32 - 2) as usize] = 1.0;
        Ok(vec![NamedTensor::f32("output", vec![1, 21], logits)?])
    };
    let config = RecognitionConfig::builder().max_resize_iterations(3).build().unwrap();
    let ocr = ocr_with_config(resizer, scripted(vec![3]), config);

    let out = ocr.predict(png(1000, 100)).await.unwrap();

    assert_eq!(out.stats.widths, vec![672, 640, 608, 576]);
    assert_eq!(out.stats.resize_iterations, 3);
    assert!(!out.stats.resize_converged);
    assert_eq!(out.stats.final_width, 576);
}

#[tokio::test]
async fn recognize_to_file_writes_latex() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("eq.png");
    std::fs::write(&input, png(64, 32)).unwrap();
    let target = dir.path().join("out").join("eq.tex");

    let ocr = ocr_with(resizer_towards(672), scripted(vec![3, 4, 6]));
    let out = ocr
        .recognize_to_file(input.to_str().unwrap(), &target)
        .await
        .unwrap();

    assert_eq!(out.latex, "x^2");
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "x^2\n");
    assert!(!dir.path().join("out").join("eq.tex.tmp").exists());
}

// ── Truncation and preview fallback ──────────────────────────────────────────

#[tokio::test]
async fn length_limit_truncates_output() {
    let config = RecognitionConfig::builder().max_seq_len(4).build().unwrap();
    let ocr = ocr_with_config(resizer_towards(672), scripted(vec![3; 50]), config);

    let out = ocr.predict(png(64, 32)).await.unwrap();

    assert_eq!(out.tokens, vec![1, 3, 3, 3, 3]);
    assert_eq!(out.latex, "xxxx");
    assert!(out.stats.truncated());
}

#[tokio::test]
async fn malformed_latex_keeps_text_and_falls_back() {
    let ocr = ocr_with(resizer_towards(672), scripted(vec![5, 3]));

    let out = ocr.predict(png(64, 32)).await.unwrap();

    assert_eq!(out.latex, "{x");
    assert_eq!(out.preview, RENDER_FALLBACK);
    assert_eq!(out.render_error, Some(RenderError::UnbalancedBraces { position: 0 }));
    assert_eq!(ocr.current_status().phase, PipelinePhase::Idle);
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn corrupted_image_is_invalid() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let resizer = move |inputs: Vec<NamedTensor>| {
        counter.fetch_add(1, Ordering::SeqCst);
        resizer_towards(672)(inputs)
    };
    let ocr = ocr_with(resizer, scripted(vec![]));

    let err = ocr.predict(b"\x89PNG\r\n\x1a\n truncated".to_vec()).await.unwrap_err();

    assert!(matches!(err, OcrError::ImageDecode { .. }), "got: {err:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let status = ocr.current_status();
    assert_eq!(status.phase, PipelinePhase::Error);
    assert_eq!(status.message.as_deref(), Some("Invalid image"));
}

#[tokio::test]
async fn resizer_fault_reports_role_and_recovers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let resizer = move |inputs: Vec<NamedTensor>| -> Result<Vec<NamedTensor>, SessionError> {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(SessionError::new("input shape mismatch"));
        }
        resizer_towards(672)(inputs)
    };
    let ocr = ocr_with(resizer, scripted(vec![3]));

    let err = ocr.predict(png(64, 32)).await.unwrap_err();
    assert!(matches!(
        err,
        OcrError::ModelInference {
            role: ModelRole::Resizer,
            ..
        }
    ));
    let status = ocr.current_status();
    assert_eq!(status.phase, PipelinePhase::Error);
    assert_eq!(status.to_string(), "Error: Resizer error. Try again. Ready");

    // The error phase is a resting state: the next prediction starts normally.
    let out = ocr.predict(png(64, 32)).await.unwrap();
    assert_eq!(out.latex, "x");
    assert_eq!(ocr.current_status().phase, PipelinePhase::Idle);
}

#[tokio::test]
async fn unknown_token_fails_prediction() {
    let ocr = ocr_with(resizer_towards(672), scripted(vec![3, 12]));

    let err = ocr.predict(png(64, 32)).await.unwrap_err();

    assert!(matches!(err, OcrError::TokenLookup { id: 12 }));
    assert_eq!(
        ocr.current_status().message.as_deref(),
        Some("Unknown token produced. Try again")
    );
}

// ── Cancellation and exclusivity ─────────────────────────────────────────────

#[tokio::test]
async fn cancel_during_decoding_discards_result() {
    let handle: Arc<OnceLock<img2latex::CancelHandle>> = Arc::new(OnceLock::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let (h, counter) = (Arc::clone(&handle), Arc::clone(&calls));
    let decoder = move |inputs: Vec<NamedTensor>| -> Result<Vec<NamedTensor>, SessionError> {
        if counter.fetch_add(1, Ordering::SeqCst) == 2 {
            if let Some(cancel) = h.get() {
                cancel.cancel();
            }
        }
        let len = inputs[0].dims[1] as usize;
        Ok(vec![logits_for(if len > 5 { EOS } else { 3 }, len)?])
    };
    let ocr = ocr_with(resizer_towards(672), decoder);
    handle.set(ocr.cancel_handle()).ok();

    let err = ocr.predict(png(64, 32)).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let status = ocr.current_status();
    assert_eq!(status.phase, PipelinePhase::Idle);
    assert_eq!(status.message, None);

    // The cancel flag does not leak into the next prediction.
    let out = ocr.predict(png(64, 32)).await.unwrap();
    assert_eq!(out.latex, "xxxxx");
}

#[tokio::test]
async fn second_prediction_while_running_is_busy() {
    let gate = Arc::new(Semaphore::new(0));
    let decoder = GatedDecoder {
        gate: Arc::clone(&gate),
    };
    let ocr = ocr_with(resizer_towards(672), decoder);
    let mut status = ocr.status();

    let first = ocr.predict(png(64, 32));
    let second = async {
        status
            .wait_for(|s| s.phase == PipelinePhase::Decoding)
            .await
            .expect("status channel open");
        let busy = ocr.predict(png(64, 32)).await;
        gate.add_permits(1);
        busy
    };
    let (first, second) = tokio::join!(first, second);

    assert!(matches!(second, Err(OcrError::Busy)));
    assert!(first.is_ok(), "got: {first:?}");
    assert_eq!(ocr.current_status().phase, PipelinePhase::Idle);
}

#[tokio::test]
async fn dropped_prediction_releases_pipeline() {
    let gate = Arc::new(Semaphore::new(0));
    let ocr = ocr_with(
        resizer_towards(672),
        GatedDecoder {
            gate: Arc::clone(&gate),
        },
    );

    let pending = ocr.predict(png(64, 32));
    let timed_out = tokio::time::timeout(std::time::Duration::from_millis(50), pending).await;
    assert!(timed_out.is_err());

    assert!(!ocr.is_running());
    gate.add_permits(1);
    assert!(ocr.predict(png(64, 32)).await.is_ok());
}
