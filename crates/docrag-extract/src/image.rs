//! Image extractor (OCR).
//!
//! Thin adapter over the `tesseract` CLI; docrag does not link an OCR engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use docrag_core::{ExtractError, Extractor, PageSegment};
use tokio::process::Command;
use tracing::debug;

/// OCR extractor for raster images.
pub struct ImageExtractor {
    /// Path to the tesseract binary
    binary: PathBuf,
    /// OCR language code
    language: String,
    /// Per-invocation deadline
    timeout: Duration,
}

impl ImageExtractor {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            language: "eng".to_string(),
            timeout,
        }
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

#[async_trait]
impl Extractor for ImageExtractor {
    fn supported_types(&self) -> &[&str] {
        &[
            "image/png",
            "image/jpeg",
            "image/jpg",
            "image/tiff",
            "image/bmp",
            "image/gif",
        ]
    }

    async fn extract(&self, path: &Path) -> Result<Vec<PageSegment>, ExtractError> {
        debug!("running ocr on {:?}", path);

        // `tesseract <input> stdout -l <lang>` writes recognized text to stdout.
        let run = Command::new(&self.binary)
            .arg(path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ExtractError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ExtractError::Failed(format!("failed to run {:?}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Failed(format!(
                "ocr exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![PageSegment::unpaged(text)])
    }
}
