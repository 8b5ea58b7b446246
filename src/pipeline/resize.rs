//! Adaptive width search.
//!
//! The encoder reads best at a width tuned to the content. The resizer model
//! classifies the current image into a width bucket; while that bucket is
//! narrower than the image, the image is resampled to it (keeping the aspect
//! ratio on the 32-pixel grid) and the resizer is asked again. The search
//! stops when the prediction is not narrower, or after
//! `max_resize_iterations` calls, so the width never grows.

use crate::config::{RecognitionConfig, GRID};
use crate::error::{ModelRole, OcrError};
use crate::model::{primary_output, ModelSession, IMAGE_INPUT};
use crate::pipeline::decode::argmax;
use crate::pipeline::normalize::PreparedImage;
use crate::status::{PipelinePhase, PipelineState};
use image::imageops::{self, FilterType};
use tracing::debug;

/// Result of the width search.
#[derive(Debug, Clone)]
pub struct WidthSearch {
    /// The image to encode.
    pub image: PreparedImage,
    /// Number of resizer invocations.
    pub iterations: usize,
    /// Width after each shrink step, starting with the input width.
    pub widths: Vec<u32>,
    /// `true` when the resizer stopped the search rather than the
    /// iteration cap.
    pub converged: bool,
}

/// Width bucket chosen by the resizer: `(argmax + 1) * 32`.
///
/// Ties go to the first maximum. `None` for an empty or all-NaN vector.
pub fn predicted_width(logits: &[f32]) -> Option<u32> {
    let idx = argmax(logits)?;
    u32::try_from(idx + 1).ok()?.checked_mul(GRID)
}

/// Height that keeps the aspect ratio at `new_width`, rounded to the grid,
/// never below `min_height`.
pub fn height_for_width(new_width: u32, width: u32, height: u32, min_height: u32) -> u32 {
    let ratio = f64::from(new_width) / f64::from(width) * f64::from(height);
    let snapped = (ratio / f64::from(GRID)).round() as u32 * GRID;
    snapped.max(min_height)
}

/// Shrink `image` to the narrowest width the resizer accepts.
///
/// Cancellation is checked after every shrink step.
pub async fn search_width(
    image: PreparedImage,
    resizer: &dyn ModelSession,
    config: &RecognitionConfig,
    state: &PipelineState,
) -> Result<WidthSearch, OcrError> {
    let mut image = image;
    let mut widths = vec![image.width()];
    let mut iterations = 0;
    let mut converged = false;

    for i in 0..config.max_resize_iterations {
        state.set_phase(PipelinePhase::Resizing, i + 1);

        let input = image
            .tensor
            .to_named(IMAGE_INPUT)
            .map_err(|e| OcrError::inference(ModelRole::Resizer, e))?;
        let outputs = resizer
            .run(vec![input])
            .await
            .map_err(|e| OcrError::inference(ModelRole::Resizer, e))?;
        iterations += 1;

        let output = primary_output(outputs)
            .ok_or_else(|| OcrError::inference(ModelRole::Resizer, "model returned no outputs"))?;
        let logits = output.data.as_f32().ok_or_else(|| {
            OcrError::inference(
                ModelRole::Resizer,
                format!("expected f32 logits, got {}", output.data.type_name()),
            )
        })?;
        let predicted = predicted_width(logits)
            .ok_or_else(|| OcrError::inference(ModelRole::Resizer, "empty logits"))?
            .max(config.min_width);

        let (width, height) = (image.width(), image.height());
        debug!("Width search iteration {}: {}px → predicted {}px", i + 1, width, predicted);

        if predicted >= width {
            converged = true;
            break;
        }

        let new_height = height_for_width(predicted, width, height, config.min_height);
        let resized = imageops::resize(&image.pixels, predicted, new_height, FilterType::Triangle);
        image = PreparedImage::from_pixels(resized, config.normalize_mean, config.normalize_std)
            .with_source_dims(image.source_dims);
        widths.push(predicted);

        if state.is_cancelled() {
            return Err(OcrError::Cancelled);
        }
    }

    Ok(WidthSearch {
        image,
        iterations,
        widths,
        converged,
    })
}
