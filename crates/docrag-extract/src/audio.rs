//! Audio extractor (speech-to-text).
//!
//! Thin adapter over an OpenAI-compatible transcription endpoint; the model
//! itself never runs in-process. Transcripts are returned as segment-tagged
//! text so long recordings chunk the same way paged documents do.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use docrag_core::{ExtractError, Extractor, PageSegment};
use serde::Deserialize;
use tracing::debug;

/// Transcription adapter for audio uploads.
pub struct AudioExtractor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Deserialize)]
struct TranscriptSegment {
    text: String,
}

impl AudioExtractor {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractError::Failed(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Extractor for AudioExtractor {
    fn supported_types(&self) -> &[&str] {
        &[
            "audio/mpeg",
            "audio/mp3",
            "audio/wav",
            "audio/m4a",
            "audio/ogg",
            "audio/flac",
        ]
    }

    async fn extract(&self, path: &Path) -> Result<Vec<PageSegment>, ExtractError> {
        debug!("transcribing {:?}", path);

        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExtractError::Failed(format!("transcription request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Failed(format!(
                "transcription provider returned {status}: {body}"
            )));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::Failed(format!("malformed transcription: {e}")))?;

        // Prefer provider segments; fall back to the whole transcript.
        if !parsed.segments.is_empty() {
            return Ok(parsed
                .segments
                .into_iter()
                .map(|s| s.text.trim().to_string())
                .filter(|t| !t.is_empty())
                .map(PageSegment::unpaged)
                .collect());
        }

        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![PageSegment::unpaged(text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_types() {
        let extractor = AudioExtractor::new(
            "http://localhost:9999/v1",
            "test-key",
            "whisper-1",
            Duration::from_secs(30),
        )
        .unwrap();
        assert!(extractor.can_extract("audio/mpeg"));
        assert!(extractor.can_extract("audio/wav"));
        assert!(!extractor.can_extract("image/png"));
    }

    #[test]
    fn test_transcription_response_parsing() {
        let json = r#"{"text": "full text", "segments": [{"text": " hello "}, {"text": "world"}]}"#;
        let parsed: TranscriptionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.segments.len(), 2);
        assert_eq!(parsed.text, "full text");
    }
}
