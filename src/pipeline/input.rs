//! Input resolution: a user-supplied path or URL → decoded bitmap.
//!
//! Local files are read from disk; `http://` and `https://` inputs are
//! downloaded into memory with a bounded timeout. Either way the bytes are
//! decoded with `image` before anything is sent to a recogniser or a model,
//! so a corrupt or non-image file fails here with a clear message rather
//! than as an upstream 400.

use crate::error::IngestError;
use image::DynamicImage;
use std::path::PathBuf;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load and decode the image at `input` (local path or HTTP(S) URL).
pub async fn load_image(input: &str, timeout_secs: u64) -> Result<DynamicImage, IngestError> {
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    decode_image(input, &bytes)
}

/// Decode raw image bytes (PNG or JPEG).
pub fn decode_image(label: &str, bytes: &[u8]) -> Result<DynamicImage, IngestError> {
    let img = image::load_from_memory(bytes).map_err(|e| IngestError::ImageDecode {
        input: label.to_string(),
        detail: e.to_string(),
    })?;
    debug!("Decoded '{}': {}x{}", label, img.width(), img.height());
    Ok(img)
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, IngestError> {
    let path = PathBuf::from(path_str);
    if !path.is_file() {
        return Err(IngestError::FileNotFound { path });
    }
    tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IngestError::FileNotFound { path: path.clone() },
        _ => IngestError::InvalidInput {
            input: format!("{}: {}", path.display(), e),
        },
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, IngestError> {
    info!("Downloading image from: {}", url);

    if reqwest::Url::parse(url).is_err() {
        return Err(IngestError::InvalidInput {
            input: url.to_string(),
        });
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| IngestError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_ingest_error = |e: reqwest::Error| {
        if e.is_timeout() {
            IngestError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            IngestError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(to_ingest_error)?;

    if !response.status().is_success() {
        return Err(IngestError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(to_ingest_error)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::io::Cursor;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/receipt.jpg"));
        assert!(is_url("http://example.com/receipt.jpg"));
        assert!(!is_url("/tmp/receipt.jpg"));
        assert!(!is_url("receipt.jpg"));
        assert!(!is_url(""));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = load_image("/definitely/not/here.png", 5).await.unwrap_err();
        assert!(matches!(err, IngestError::FileNotFound { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn non_image_file_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.png");
        std::fs::write(&path, b"this is not a png").unwrap();
        let err = load_image(path.to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, IngestError::ImageDecode { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn local_png_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 7, Luma([0])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        std::fs::write(&path, buf).unwrap();

        let loaded = load_image(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!((loaded.width(), loaded.height()), (3, 7));
    }
}
