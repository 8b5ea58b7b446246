//! Configuration types for image-to-LaTeX recognition.
//!
//! All recognition behaviour is controlled through [`RecognitionConfig`],
//! built via its [`RecognitionConfigBuilder`]. The constants match the
//! geometry the exported models were trained on: 32-pixel grid, a
//! 672×192 canvas, and greedy decoding bounded at 512 tokens.

use crate::error::OcrError;
use crate::pipeline::render::RenderMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pixel grid every tensor dimension is aligned to (the models' downsampling
/// factor).
pub const GRID: u32 = 32;

/// Configuration for a recognition run.
///
/// Built via [`RecognitionConfig::builder()`] or using
/// [`RecognitionConfig::default()`].
///
/// # Example
/// ```rust
/// use img2latex::RecognitionConfig;
///
/// let config = RecognitionConfig::builder()
///     .max_width(640)
///     .max_seq_len(256)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_width, 640);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Widest image (pixels) handed to the models. Default: 672.
    ///
    /// Wider inputs are downscaled proportionally before grid padding.
    pub max_width: u32,

    /// Tallest image (pixels) handed to the models. Default: 192.
    ///
    /// Checked independently of `max_width`, after the width check.
    pub max_height: u32,

    /// Smallest width the width search may shrink to. Default: 32.
    pub min_width: u32,

    /// Smallest height the width search may shrink to. Default: 32.
    pub min_height: u32,

    /// Begin-of-sequence token id. Default: 1.
    pub bos_token: i64,

    /// End-of-sequence token id. Default: 2.
    pub eos_token: i64,

    /// Padding token id. Default: 0. Never emitted mid-generation, but must
    /// be present in the vocabulary and distinct from BOS and EOS.
    pub pad_token: i64,

    /// Maximum number of decode steps. Default: 512.
    ///
    /// The generated sequence is at most `max_seq_len + 1` ids long
    /// (including the leading BOS).
    pub max_seq_len: usize,

    /// Normalisation mean, as a fraction of the image's maximum sample.
    /// Default: 0.7931.
    ///
    /// A calibration constant, not a statistic of the input image.
    pub normalize_mean: f32,

    /// Normalisation standard deviation, as a fraction of the image's
    /// maximum sample. Default: 0.1738.
    pub normalize_std: f32,

    /// Upper bound on width-search iterations. Default: 10.
    pub max_resize_iterations: usize,

    /// Preview markup flavour. Default: [`RenderMode::Display`].
    pub render_mode: RenderMode,

    /// Where the model and vocabulary assets come from.
    pub models: ModelSources,

    /// Root directory for downloaded model assets. Default: platform cache
    /// dir (`$XDG_CACHE_HOME/img2latex` or `~/.cache/img2latex`).
    pub cache_dir: Option<PathBuf>,

    /// Cache generation tag. Downloads are stored under
    /// `cache_dir/<generation>/`; other generations are evicted on load.
    pub cache_generation: String,

    /// Download timeout for image and model URLs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Intra-op threads per ONNX session. `None` lets the runtime decide.
    pub intra_threads: Option<usize>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            max_width: 672,
            max_height: 192,
            min_width: 32,
            min_height: 32,
            bos_token: 1,
            eos_token: 2,
            pad_token: 0,
            max_seq_len: 512,
            normalize_mean: 0.7931,
            normalize_std: 0.1738,
            max_resize_iterations: 10,
            render_mode: RenderMode::default(),
            models: ModelSources::default(),
            cache_dir: None,
            cache_generation: "v1".to_string(),
            download_timeout_secs: 120,
            intra_threads: None,
        }
    }
}

impl RecognitionConfig {
    /// Create a new builder for `RecognitionConfig`.
    pub fn builder() -> RecognitionConfigBuilder {
        RecognitionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Resolved cache root: the configured directory or the platform default.
    pub fn cache_root(&self) -> PathBuf {
        if let Some(ref dir) = self.cache_dir {
            return dir.clone();
        }
        if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
            return PathBuf::from(xdg).join("img2latex");
        }
        if let Some(home) = std::env::var_os("HOME").filter(|v| !v.is_empty()) {
            return PathBuf::from(home).join(".cache").join("img2latex");
        }
        std::env::temp_dir().join("img2latex-cache")
    }
}

/// Builder for [`RecognitionConfig`].
#[derive(Debug)]
pub struct RecognitionConfigBuilder {
    config: RecognitionConfig,
}

impl RecognitionConfigBuilder {
    pub fn max_width(mut self, px: u32) -> Self {
        self.config.max_width = px;
        self
    }

    pub fn max_height(mut self, px: u32) -> Self {
        self.config.max_height = px;
        self
    }

    pub fn min_width(mut self, px: u32) -> Self {
        self.config.min_width = px;
        self
    }

    pub fn min_height(mut self, px: u32) -> Self {
        self.config.min_height = px;
        self
    }

    pub fn bos_token(mut self, id: i64) -> Self {
        self.config.bos_token = id;
        self
    }

    pub fn eos_token(mut self, id: i64) -> Self {
        self.config.eos_token = id;
        self
    }

    pub fn pad_token(mut self, id: i64) -> Self {
        self.config.pad_token = id;
        self
    }

    pub fn max_seq_len(mut self, n: usize) -> Self {
        self.config.max_seq_len = n.max(1);
        self
    }

    pub fn normalize_mean(mut self, mean: f32) -> Self {
        self.config.normalize_mean = mean;
        self
    }

    pub fn normalize_std(mut self, std: f32) -> Self {
        self.config.normalize_std = std;
        self
    }

    pub fn max_resize_iterations(mut self, n: usize) -> Self {
        self.config.max_resize_iterations = n.max(1);
        self
    }

    pub fn render_mode(mut self, mode: RenderMode) -> Self {
        self.config.render_mode = mode;
        self
    }

    pub fn models(mut self, models: ModelSources) -> Self {
        self.config.models = models;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    pub fn cache_generation(mut self, tag: impl Into<String>) -> Self {
        self.config.cache_generation = tag.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn intra_threads(mut self, n: usize) -> Self {
        self.config.intra_threads = Some(n.max(1));
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RecognitionConfig, OcrError> {
        let c = &self.config;
        for (name, value) in [
            ("max_width", c.max_width),
            ("max_height", c.max_height),
            ("min_width", c.min_width),
            ("min_height", c.min_height),
        ] {
            if value == 0 || value % GRID != 0 {
                return Err(OcrError::InvalidConfig(format!(
                    "{name} must be a positive multiple of {GRID}, got {value}"
                )));
            }
        }
        if c.min_width > c.max_width || c.min_height > c.max_height {
            return Err(OcrError::InvalidConfig(format!(
                "minimum size {}x{} exceeds maximum size {}x{}",
                c.min_width, c.min_height, c.max_width, c.max_height
            )));
        }
        if c.bos_token == c.eos_token || c.pad_token == c.bos_token || c.pad_token == c.eos_token {
            return Err(OcrError::InvalidConfig(format!(
                "bos_token, eos_token and pad_token must differ (got {}, {}, {})",
                c.bos_token, c.eos_token, c.pad_token
            )));
        }
        if !(c.normalize_std.is_finite() && c.normalize_std > 0.0) {
            return Err(OcrError::InvalidConfig(format!(
                "normalize_std must be > 0, got {}",
                c.normalize_std
            )));
        }
        if !c.normalize_mean.is_finite() {
            return Err(OcrError::InvalidConfig(
                "normalize_mean must be finite".into(),
            ));
        }
        if c.cache_generation.is_empty()
            || c.cache_generation.contains(['/', '\\'])
            || c.cache_generation.starts_with('.')
        {
            return Err(OcrError::InvalidConfig(format!(
                "cache_generation must be a plain directory name, got '{}'",
                c.cache_generation
            )));
        }
        Ok(self.config)
    }
}

/// Locations of the four assets a [`crate::LatexOcr`] needs.
///
/// Each entry is a local path or an HTTP/HTTPS URL. URLs are downloaded
/// once into the versioned model cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSources {
    pub resizer: String,
    pub encoder: String,
    pub decoder: String,
    pub tokenizer: String,
}

impl Default for ModelSources {
    fn default() -> Self {
        Self::from_dir("models")
    }
}

impl ModelSources {
    /// File names used inside a model directory.
    pub const RESIZER_FILE: &'static str = "image_resizer.onnx";
    pub const ENCODER_FILE: &'static str = "encoder.onnx";
    pub const DECODER_FILE: &'static str = "decoder.onnx";
    pub const TOKENIZER_FILE: &'static str = "tokenizer.json";

    /// All four assets from one local directory using the standard names.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let join = |file: &str| dir.join(file).to_string_lossy().into_owned();
        Self {
            resizer: join(Self::RESIZER_FILE),
            encoder: join(Self::ENCODER_FILE),
            decoder: join(Self::DECODER_FILE),
            tokenizer: join(Self::TOKENIZER_FILE),
        }
    }

    /// All four assets under one base URL using the standard names.
    pub fn from_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let join = |file: &str| format!("{base}/{file}");
        Self {
            resizer: join(Self::RESIZER_FILE),
            encoder: join(Self::ENCODER_FILE),
            decoder: join(Self::DECODER_FILE),
            tokenizer: join(Self::TOKENIZER_FILE),
        }
    }
}
