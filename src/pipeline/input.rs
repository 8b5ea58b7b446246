//! Input resolution: turn a user-supplied path, URL or `-` into image bytes.
//!
//! Images are small, so everything is read into memory; the normaliser
//! decodes from a byte buffer. The same HTTP helper downloads model assets
//! for [`crate::assets`].

use crate::error::OcrError;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Read stdin when the input is exactly this.
pub const STDIN_INPUT: &str = "-";

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to the raw bytes of an image.
///
/// * `http://` / `https://` → downloaded with `timeout_secs`
/// * `-` → all of stdin
/// * anything else → a local file
pub async fn resolve_image(input: &str, timeout_secs: u64) -> Result<Vec<u8>, OcrError> {
    let bytes = if is_url(input) {
        download(input, timeout_secs).await?
    } else if input == STDIN_INPUT {
        read_stdin().await?
    } else {
        read_local(input).await?
    };

    if bytes.is_empty() {
        return Err(OcrError::InvalidInput {
            input: input.to_string(),
            reason: "no data".into(),
        });
    }
    Ok(bytes)
}

/// Read a local file, mapping I/O failures to path-specific errors.
pub async fn read_local(path_str: &str) -> Result<Vec<u8>, OcrError> {
    let path = PathBuf::from(path_str);
    if path.is_dir() {
        return Err(OcrError::InvalidInput {
            input: path_str.to_string(),
            reason: "is a directory".into(),
        });
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(OcrError::PermissionDenied { path })
        }
        Err(_) => Err(OcrError::FileNotFound { path }),
    }
}

async fn read_stdin() -> Result<Vec<u8>, OcrError> {
    let mut buf = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut buf)
        .await
        .map_err(|e| OcrError::InvalidInput {
            input: STDIN_INPUT.to_string(),
            reason: e.to_string(),
        })?;
    Ok(buf)
}

/// GET `url` into memory.
pub async fn download(url: &str, timeout_secs: u64) -> Result<Vec<u8>, OcrError> {
    info!("Downloading {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| OcrError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            OcrError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            OcrError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(OcrError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    debug!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok(bytes.to_vec())
}

/// Last non-empty path segment of a URL, if any.
pub fn url_file_name(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    (!last.is_empty()).then(|| last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/eq.png"));
        assert!(is_url("http://example.com/eq.png"));
        assert!(!is_url("/tmp/eq.png"));
        assert!(!is_url("eq.png"));
        assert!(!is_url(""));
    }

    #[test]
    fn test_url_file_name() {
        assert_eq!(
            url_file_name("https://host/models/encoder.onnx?x=1").as_deref(),
            Some("encoder.onnx")
        );
        assert_eq!(url_file_name("https://host/"), None);
        assert_eq!(url_file_name("not a url"), None);
    }

    #[tokio::test]
    async fn reads_local_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"\x89PNG fake").unwrap();
        let bytes = resolve_image(f.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(bytes, b"\x89PNG fake");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = resolve_image("/definitely/not/here.png", 5).await.unwrap_err();
        assert!(matches!(err, OcrError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn empty_file_is_invalid() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let err = resolve_image(f.path().to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, OcrError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn directory_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_image(dir.path().to_str().unwrap(), 5).await.unwrap_err();
        assert!(err.to_string().contains("directory"));
    }
}
