//! PDF extractor.
//!
//! Walks pages with lopdf and emits one segment per page so downstream
//! chunks can carry their page number.

use std::path::Path;

use async_trait::async_trait;
use docrag_core::{ExtractError, Extractor, PageSegment};
use lopdf::Document;
use tracing::{debug, warn};

/// Extractor for PDF files.
pub struct PdfExtractor;

impl PdfExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for PdfExtractor {
    fn supported_types(&self) -> &[&str] {
        &["application/pdf"]
    }

    async fn extract(&self, path: &Path) -> Result<Vec<PageSegment>, ExtractError> {
        debug!("extracting pdf: {:?}", path);

        let bytes = tokio::fs::read(path).await?;

        // lopdf parsing and text decoding are CPU-bound.
        let segments = tokio::task::spawn_blocking(move || extract_pages(&bytes))
            .await
            .map_err(|e| ExtractError::Failed(format!("task join error: {e}")))??;

        Ok(segments)
    }
}

fn extract_pages(bytes: &[u8]) -> Result<Vec<PageSegment>, ExtractError> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| ExtractError::Failed(format!("pdf parse error: {e}")))?;

    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(ExtractError::Failed("pdf has no pages".to_string()));
    }

    let mut segments = Vec::with_capacity(pages.len());
    for page_num in pages.keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(text) => {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    segments.push(PageSegment::page(*page_num, text));
                }
            }
            Err(e) => {
                // A single undecodable page (e.g. image-only) is not fatal.
                warn!("failed to extract text from page {}: {}", page_num, e);
            }
        }
    }

    Ok(segments)
}
