//! Image normalisation: arbitrary image bytes → grid-aligned grayscale tensor.
//!
//! Steps, in order:
//!
//! 1. decode to RGBA (malformed input aborts the prediction)
//! 2. composite onto white, removing transparency
//! 3. downscale proportionally if wider than `max_width`, then, as a
//!    separate check, if taller than `max_height`
//! 4. pad right/bottom with white to the next multiple of 32
//! 5. average R, G, B into one channel
//! 6. normalise against the image's own maximum with the calibration
//!    `mean`/`std` constants
//!
//! Decoding and resampling are CPU-bound, so the async entry point runs them
//! on a blocking thread.

use crate::config::{RecognitionConfig, GRID};
use crate::error::OcrError;
use crate::model::{NamedTensor, SessionError};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tracing::debug;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Single-channel normalised image, row-major `[1, 1, height, width]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl ImageTensor {
    /// NCHW dims as declared to the models.
    pub fn dims(&self) -> Vec<i64> {
        vec![1, 1, i64::from(self.height), i64::from(self.width)]
    }

    /// Wrap as a model input named `name`.
    pub fn to_named(&self, name: &str) -> Result<NamedTensor, SessionError> {
        NamedTensor::f32(name, self.dims(), self.data.clone())
    }
}

/// The composited pixels plus their tensor.
///
/// The width search resamples `pixels` and recomputes the tensor, so both
/// travel together until the encoder consumes the tensor.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub pixels: RgbaImage,
    pub tensor: ImageTensor,
    /// Dimensions of the decoded input before any scaling or padding.
    pub source_dims: (u32, u32),
}

impl PreparedImage {
    pub fn from_pixels(pixels: RgbaImage, mean: f32, std: f32) -> Self {
        let gray = to_gray(&pixels);
        let tensor = ImageTensor {
            data: normalize(&gray, mean, std),
            width: pixels.width(),
            height: pixels.height(),
        };
        Self {
            source_dims: pixels.dimensions(),
            pixels,
            tensor,
        }
    }

    /// Keep the original input dimensions across a resample.
    pub fn with_source_dims(mut self, dims: (u32, u32)) -> Self {
        self.source_dims = dims;
        self
    }

    pub fn width(&self) -> u32 {
        self.tensor.width
    }

    pub fn height(&self) -> u32 {
        self.tensor.height
    }
}

/// Run the full normaliser on a blocking thread.
pub async fn prepare_image(bytes: Vec<u8>, config: &RecognitionConfig) -> Result<PreparedImage, OcrError> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || normalize_image(&bytes, &config))
        .await
        .map_err(|e| OcrError::Internal(format!("image normalisation task failed: {e}")))?
}

/// Decode, bound, pad and normalise `bytes`.
pub fn normalize_image(bytes: &[u8], config: &RecognitionConfig) -> Result<PreparedImage, OcrError> {
    let mut img = decode_image(bytes)?;
    let (orig_w, orig_h) = img.dimensions();

    composite_on_white(&mut img);
    let img = fit_within(img, config.max_width, config.max_height);
    let img = pad_to_grid(img);

    debug!(
        "Normalised image {}x{} → {}x{}",
        orig_w,
        orig_h,
        img.width(),
        img.height()
    );

    Ok(
        PreparedImage::from_pixels(img, config.normalize_mean, config.normalize_std)
            .with_source_dims((orig_w, orig_h)),
    )
}

/// Decode any supported format into RGBA8.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, OcrError> {
    let img = image::load_from_memory(bytes).map_err(|e| OcrError::ImageDecode {
        detail: e.to_string(),
    })?;
    let rgba = img.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(OcrError::ImageDecode {
            detail: "image has zero width or height".into(),
        });
    }
    Ok(rgba)
}

/// Blend every pixel over an opaque white background.
pub fn composite_on_white(img: &mut RgbaImage) {
    for px in img.pixels_mut() {
        let alpha = u32::from(px[3]);
        if alpha == 255 {
            continue;
        }
        for c in 0..3 {
            let v = u32::from(px[c]) * alpha + 255 * (255 - alpha);
            px[c] = ((v + 127) / 255) as u8;
        }
        px[3] = 255;
    }
}

/// Downscale proportionally so width ≤ `max_w`, then so height ≤ `max_h`.
///
/// The two checks are independent: the height check sees the result of the
/// width check.
pub fn fit_within(img: RgbaImage, max_w: u32, max_h: u32) -> RgbaImage {
    let mut img = img;
    if img.width() > max_w {
        let h = scaled(img.height(), max_w, img.width());
        img = imageops::resize(&img, max_w, h, FilterType::Triangle);
    }
    if img.height() > max_h {
        let w = scaled(img.width(), max_h, img.height());
        img = imageops::resize(&img, w, max_h, FilterType::Triangle);
    }
    img
}

/// `value * num / den`, rounded, at least 1.
fn scaled(value: u32, num: u32, den: u32) -> u32 {
    let v = (f64::from(value) * f64::from(num) / f64::from(den)).round();
    (v as u32).max(1)
}

/// Extend the canvas to the next multiple of [`GRID`] in both axes, keeping
/// content at the top-left and filling with white.
pub fn pad_to_grid(img: RgbaImage) -> RgbaImage {
    let (w, h) = img.dimensions();
    let (gw, gh) = (w.div_ceil(GRID) * GRID, h.div_ceil(GRID) * GRID);
    if (gw, gh) == (w, h) {
        return img;
    }
    let mut canvas = RgbaImage::from_pixel(gw, gh, WHITE);
    imageops::replace(&mut canvas, &img, 0, 0);
    canvas
}

/// Average of R, G and B per pixel; alpha is ignored.
pub fn to_gray(img: &RgbaImage) -> Vec<u8> {
    img.pixels()
        .map(|px| {
            let sum = u16::from(px[0]) + u16::from(px[1]) + u16::from(px[2]);
            (f32::from(sum) / 3.0).round() as u8
        })
        .collect()
}

/// `(v - mean·max) / (std·max)` where `max` is the brightest sample
/// (at least 1).
pub fn normalize(gray: &[u8], mean: f32, std: f32) -> Vec<f32> {
    let max = f32::from(gray.iter().copied().max().unwrap_or(0).max(1));
    let offset = mean * max;
    let scale = std * max;
    gray.iter().map(|&v| (f32::from(v) - offset) / scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn png(img: RgbaImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("png encode");
        buf
    }

    #[test]
    fn rejects_garbage_bytes() {
        let err = normalize_image(b"definitely not an image", &RecognitionConfig::default())
            .unwrap_err();
        assert!(matches!(err, OcrError::ImageDecode { .. }), "got: {err:?}");
    }

    #[test]
    fn pads_small_image_to_grid() {
        let bytes = png(RgbaImage::from_pixel(50, 20, Rgba([0, 0, 0, 255])));
        let prepared = normalize_image(&bytes, &RecognitionConfig::default()).unwrap();
        assert_eq!((prepared.width(), prepared.height()), (64, 32));
        assert_eq!(prepared.source_dims, (50, 20));
        assert_eq!(prepared.tensor.data.len(), 64 * 32);
        // Padding is white; the original content stays at the top-left.
        assert_eq!(prepared.pixels.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(prepared.pixels.get_pixel(63, 31), &WHITE);
    }

    #[test]
    fn wide_image_is_bounded_by_max_width() {
        let bytes = png(RgbaImage::from_pixel(2000, 100, Rgba([10, 10, 10, 255])));
        let prepared = normalize_image(&bytes, &RecognitionConfig::default()).unwrap();
        assert_eq!(prepared.width(), 672);
        assert!(prepared.height() <= 192);
        assert_eq!(prepared.height() % 32, 0);
    }

    #[test]
    fn tall_image_is_bounded_by_max_height() {
        let bytes = png(RgbaImage::from_pixel(100, 1000, Rgba([10, 10, 10, 255])));
        let prepared = normalize_image(&bytes, &RecognitionConfig::default()).unwrap();
        assert_eq!(prepared.height(), 192);
        assert_eq!(prepared.width() % 32, 0);
        assert!(prepared.width() <= 672);
    }

    #[test]
    fn fit_within_checks_width_then_height() {
        // 1344x768 → width check gives 672x384 → height check gives 336x192.
        let img = RgbaImage::from_pixel(1344, 768, WHITE);
        let out = fit_within(img, 672, 192);
        assert_eq!(out.dimensions(), (336, 192));
    }

    #[test]
    fn transparent_pixels_become_white() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        img.put_pixel(1, 0, Rgba([0, 0, 0, 128]));
        composite_on_white(&mut img);
        assert_eq!(img.get_pixel(0, 0), &WHITE);
        let half = img.get_pixel(1, 0);
        assert_eq!(half[3], 255);
        assert!((126..=128).contains(&half[0]), "got {half:?}");
    }

    #[test]
    fn gray_is_channel_average() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([30, 60, 91, 7]));
        assert_eq!(to_gray(&img), vec![60]);
    }

    #[test]
    fn normalize_uses_image_max() {
        let out = normalize(&[0, 100, 200], 0.5, 0.25);
        // max = 200 → offset 100, scale 50
        assert_eq!(out, vec![-2.0, 0.0, 2.0]);
    }

    #[test]
    fn normalize_all_black_does_not_divide_by_zero() {
        let out = normalize(&[0, 0], 0.7931, 0.1738);
        assert!(out.iter().all(|v| v.is_finite()));
    }
}
