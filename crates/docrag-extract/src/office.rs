//! Office document extractor (DOCX).
//!
//! A DOCX file is a zip archive; the body lives in `word/document.xml`.
//! Paragraph boundaries (`</w:p>`) become newlines, every other tag is
//! stripped. Legacy binary `.doc` is not parseable this way and is rejected.

use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use docrag_core::{ExtractError, Extractor, PageSegment};
use tracing::debug;
use zip::ZipArchive;

/// Extractor for Office Open XML word-processing documents.
pub struct OfficeExtractor;

impl OfficeExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for OfficeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for OfficeExtractor {
    fn supported_types(&self) -> &[&str] {
        &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"]
    }

    async fn extract(&self, path: &Path) -> Result<Vec<PageSegment>, ExtractError> {
        debug!("extracting docx: {:?}", path);

        let bytes = tokio::fs::read(path).await?;

        let text = tokio::task::spawn_blocking(move || extract_docx_text(&bytes))
            .await
            .map_err(|e| ExtractError::Failed(format!("task join error: {e}")))??;

        if text.trim().is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![PageSegment::unpaged(text)])
    }
}

fn extract_docx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = ZipArchive::new(cursor)
        .map_err(|e| ExtractError::Failed(format!("not a docx archive: {e}")))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Failed(format!("missing word/document.xml: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::Failed(format!("unreadable document.xml: {e}")))?;

    Ok(strip_document_xml(&xml))
}

/// Reduce the WordprocessingML body to plain text with paragraph breaks.
fn strip_document_xml(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 4);
    let mut in_tag = false;
    let mut tag = String::new();

    for ch in xml.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' => {
                in_tag = false;
                if tag == "/w:p" {
                    out.push('\n');
                }
            }
            _ if in_tag => tag.push(ch),
            _ => out.push(ch),
        }
    }

    // Collapse entity escapes the body commonly carries.
    let out = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'");

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_docx(path: &Path, body_xml: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(body_xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn test_extract_docx_paragraphs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memo.docx");
        write_docx(
            &path,
            "<w:document><w:body>\
             <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>\
             <w:p><w:r><w:t>Second paragraph.</w:t></w:r></w:p>\
             </w:body></w:document>",
        );

        let segments = OfficeExtractor::new().extract(&path).await.unwrap();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].text.contains("First paragraph."));
        assert!(segments[0]
            .text
            .contains("First paragraph.\nSecond paragraph."));
    }

    #[tokio::test]
    async fn test_extract_non_zip_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fake.docx");
        std::fs::write(&path, b"plain bytes").unwrap();

        let result = OfficeExtractor::new().extract(&path).await;
        assert!(matches!(result.unwrap_err(), ExtractError::Failed(_)));
    }

    #[test]
    fn test_strip_entities() {
        let text = strip_document_xml("<w:p><w:t>Fish &amp; chips</w:t></w:p>");
        assert_eq!(text, "Fish & chips");
    }
}
