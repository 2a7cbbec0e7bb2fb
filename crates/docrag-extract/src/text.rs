//! Plain-text extractor.

use std::path::Path;

use async_trait::async_trait;
use docrag_core::{ExtractError, Extractor, PageSegment};
use tokio::fs;

/// Extractor for plain text and text-like formats.
///
/// Produces a single unpaged segment; these formats carry no page structure.
pub struct TextExtractor;

impl TextExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for TextExtractor {
    fn supported_types(&self) -> &[&str] {
        &[
            "text/plain",
            "text/markdown",
            "text/x-markdown",
            "text/html",
            "text/csv",
            "text/x-csv",
            "application/csv",
            "application/json",
            "application/xml",
            "text/xml",
        ]
    }

    async fn extract(&self, path: &Path) -> Result<Vec<PageSegment>, ExtractError> {
        let content = fs::read_to_string(path).await?;
        if content.trim().is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![PageSegment::unpaged(content)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_extract_text_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "First paragraph.\n\nSecond paragraph.").unwrap();

        let segments = TextExtractor::new().extract(&path).await.unwrap();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].text.contains("Second paragraph."));
        assert_eq!(segments[0].page_number, None);
    }

    #[tokio::test]
    async fn test_extract_whitespace_only_yields_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, "   \n\t\n").unwrap();

        let segments = TextExtractor::new().extract(&path).await.unwrap();
        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn test_extract_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.txt");

        let result = TextExtractor::new().extract(&path).await;
        assert!(matches!(result.unwrap_err(), ExtractError::Io(_)));
    }
}
