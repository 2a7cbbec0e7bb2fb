//! Trait seams for docrag components.
//!
//! - [`Extractor`]: turn a file into page-tagged text segments
//! - [`Embedder`]: turn texts into dense vectors
//! - [`Generator`]: turn a prompt into an answer, whole or streamed
//!
//! Implementations are registered statically at startup by the composition
//! root; there is no runtime code loading. Components receive their
//! dependencies as explicit `Arc` handles through their constructors.

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::{EmbedError, ExtractError, GenerateError};
use crate::types::{GenerationOutput, GenerationRequest, PageSegment};

// ============================================================================
// Extraction
// ============================================================================

/// Extracts text from one modality of uploaded file.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// MIME types this extractor handles.
    fn supported_types(&self) -> &[&str];

    /// Whether this extractor handles the given MIME type.
    fn can_extract(&self, mime_type: &str) -> bool {
        self.supported_types().contains(&mime_type)
    }

    /// Extract page- or segment-tagged text from a file.
    async fn extract(&self, path: &Path) -> Result<Vec<PageSegment>, ExtractError>;
}

// ============================================================================
// Embedding
// ============================================================================

/// Turns texts into dense vectors via an external provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Provider model identifier.
    fn model_name(&self) -> &str;

    /// Vector dimension.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, preserving order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single query string.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed(&[query]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::InvalidResponse("empty embedding batch".to_string()))
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Stream of answer text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GenerateError>> + Send>>;

/// Generates answers from an assembled prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate the full answer in one call.
    async fn generate(&self, request: &GenerationRequest)
        -> Result<GenerationOutput, GenerateError>;

    /// Generate the answer as a stream of text fragments.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<TextStream, GenerateError>;
}
