//! Versioned on-disk cache for downloaded model assets.
//!
//! Layout: `<root>/<generation>/<hash>-<file name>`. Only the current
//! generation is kept; [`AssetCache::evict_stale`] removes every other
//! generation directory so a model upgrade does not leave gigabytes behind.
//!
//! Writes go to a temp file in the generation directory and are renamed into
//! place, so a crash mid-download never leaves a truncated asset that would
//! later be treated as valid.

use crate::config::RecognitionConfig;
use crate::error::OcrError;
use crate::pipeline::input::{download, is_url, read_local, url_file_name};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Cache rooted at one directory, pinned to one generation.
#[derive(Debug, Clone)]
pub struct AssetCache {
    root: PathBuf,
    generation: String,
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>, generation: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            generation: generation.into(),
        }
    }

    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self::new(config.cache_root(), config.cache_generation.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the current generation's assets.
    pub fn generation_dir(&self) -> PathBuf {
        self.root.join(&self.generation)
    }

    /// Cache path for `url`. The hash prefix keeps identically named files
    /// from different hosts apart.
    pub fn path_for(&self, url: &str) -> PathBuf {
        let name = url_file_name(url).unwrap_or_else(|| "asset".to_string());
        let name: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect();
        self.generation_dir()
            .join(format!("{:016x}-{}", fnv1a(url.as_bytes()), name))
    }

    /// Cached bytes for `url`, if present.
    pub async fn get(&self, url: &str) -> Option<Vec<u8>> {
        let path = self.path_for(url);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!("Cache hit: {}", path.display());
                Some(bytes)
            }
            Err(_) => None,
        }
    }

    /// Store `bytes` for `url` atomically; returns the final path.
    pub async fn store(&self, url: &str, bytes: Vec<u8>) -> Result<PathBuf, OcrError> {
        let dir = self.generation_dir();
        let path = self.path_for(url);
        let target = path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), OcrError> {
            let cache_err = |path: &Path, source: std::io::Error| OcrError::Cache {
                path: path.to_path_buf(),
                source,
            };
            std::fs::create_dir_all(&dir).map_err(|e| cache_err(&dir, e))?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| cache_err(&dir, e))?;
            tmp.write_all(&bytes).map_err(|e| cache_err(tmp.path(), e))?;
            tmp.persist(&target).map_err(|e| cache_err(&target, e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| OcrError::Internal(format!("cache write task failed: {e}")))??;

        debug!("Cached {} → {}", url, path.display());
        Ok(path)
    }

    /// Delete every generation directory other than the current one.
    ///
    /// Returns the removed directories. A missing root is not an error;
    /// a directory that cannot be removed is logged and skipped.
    pub async fn evict_stale(&self) -> Result<Vec<PathBuf>, OcrError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(OcrError::Cache {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut removed = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(OcrError::Cache {
                        path: self.root.clone(),
                        source,
                    })
                }
            };
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir || entry.file_name() == self.generation.as_str() {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    info!("Evicted stale model cache {}", path.display());
                    removed.push(path);
                }
                Err(e) => warn!("Could not evict {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }
}

/// 64-bit FNV-1a; stable across builds, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |h, &b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Load an asset from a local path, or from `cache` / the network for URLs.
pub async fn fetch_asset(source: &str, cache: &AssetCache, timeout_secs: u64) -> Result<Vec<u8>, OcrError> {
    if !is_url(source) {
        return read_local(source).await;
    }
    if let Some(bytes) = cache.get(source).await {
        return Ok(bytes);
    }
    let bytes = download(source, timeout_secs).await?;
    cache.store(source, bytes.clone()).await?;
    Ok(bytes)
}
