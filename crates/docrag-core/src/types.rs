//! Core types for docrag.
//!
//! This module contains the shared data structures used across docrag:
//!
//! ## Documents and chunks
//! - [`DocumentRecord`]: Metadata about an uploaded document
//! - [`DocumentStatus`]: Ingestion lifecycle state of a document
//! - [`ChunkRecord`]: A persisted text chunk with embedding bookkeeping
//!
//! ## Extraction and chunking
//! - [`PageSegment`]: A page- or segment-tagged slice of extracted text
//! - [`ChunkPiece`]: Chunker output before persistence
//!
//! ## Search
//! - [`SearchMode`]: Vector, full-text, or hybrid retrieval
//! - [`SourceItem`]: An enriched, ranked search result
//!
//! ## Generation
//! - [`QueryRequest`]: Validated retrieval/RAG parameters
//! - [`RagResponse`], [`RetrievalResponse`]: Response shapes
//! - [`RagEvent`]: Typed streaming events
//! - [`CitationItem`]: A bound citation marker
//! - [`GenerationRequest`], [`GenerationOutput`]: The LLM seam

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// Documents
// ============================================================================

/// Ingestion lifecycle state of a document.
///
/// Transitions are monotone (`pending -> processing -> completed|failed`)
/// except for the operator retry path `failed -> pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Uploaded, waiting for a worker
    Pending,
    /// A worker is extracting/chunking/embedding it
    Processing,
    /// Fully ingested; every chunk has an embedding
    Completed,
    /// Ingestion failed; `error_message` explains why
    Failed,
}

impl DocumentStatus {
    /// Database string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Parse the database string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "completed" => Some(DocumentStatus::Completed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata about an uploaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Database identifier
    pub id: i64,
    /// Owning user
    pub owner_id: i64,
    /// Stored filename (sanitized, unique within the owner's directory)
    pub filename: String,
    /// Filename as uploaded
    pub original_filename: String,
    /// Absolute path inside the owner's isolated upload directory
    pub file_path: String,
    /// Size in bytes
    pub file_size: i64,
    /// MIME type as declared at upload
    pub mime_type: String,
    /// Lifecycle state
    pub status: DocumentStatus,
    /// Failure detail when `status == Failed`
    pub error_message: Option<String>,
    /// Ingestion job identifier (unique)
    pub job_id: String,
    /// Upload time
    pub created_at: DateTime<Utc>,
    /// Completion time (None until ingested)
    pub processed_at: Option<DateTime<Utc>>,
}

/// A persisted text chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Database identifier
    pub id: i64,
    /// Parent document
    pub document_id: i64,
    /// Dense 0-based position within the document
    pub chunk_index: i64,
    /// Source page (PDFs), None for unpaged formats
    pub page_number: Option<i64>,
    /// Chunk text (never empty)
    pub content: String,
    /// Token count under the embedding model's tokenizer
    pub token_count: i64,
    /// Whether a vector-index slot points at this chunk
    pub has_embedding: bool,
    /// Embedding model tag, set when `has_embedding` flips
    pub embedding_model: Option<String>,
    /// Insertion time
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Extraction and chunking
// ============================================================================

/// A page- or segment-tagged slice of extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSegment {
    /// 1-based page number where the format has pages
    pub page_number: Option<u32>,
    /// Extracted text for the segment
    pub text: String,
}

impl PageSegment {
    /// Segment with a page number.
    #[must_use]
    pub fn page(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number: Some(page_number),
            text: text.into(),
        }
    }

    /// Segment without page information.
    #[must_use]
    pub fn unpaged(text: impl Into<String>) -> Self {
        Self {
            page_number: None,
            text: text.into(),
        }
    }
}

/// Chunker output, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    /// Chunk text
    pub content: String,
    /// Dense 0-based index across the whole document
    pub chunk_index: usize,
    /// Page number inherited from the source segment
    pub page_number: Option<u32>,
    /// Token count of `content`
    pub token_count: usize,
}

// ============================================================================
// Search
// ============================================================================

/// Retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Semantic similarity over the vector index
    Vector,
    /// BM25-ranked full-text search
    Fulltext,
    /// Reciprocal-rank fusion of both branches
    Hybrid,
}

impl SearchMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Vector => "vector",
            SearchMode::Fulltext => "fulltext",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" => Ok(SearchMode::Vector),
            "fulltext" => Ok(SearchMode::Fulltext),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(Error::InvalidParameter(format!(
                "unknown search mode: {other} (use vector, fulltext, or hybrid)"
            ))),
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An enriched, ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    /// Matched chunk
    pub chunk_id: i64,
    /// Owning document
    pub document_id: i64,
    /// Original filename of the document
    pub document_filename: String,
    /// Full chunk text
    pub content: String,
    /// Chunk position within the document
    pub chunk_index: i64,
    /// Source page, if any
    pub page_number: Option<i64>,
    /// Fused or native score, higher better
    pub score: f64,
    /// 1-based rank in the result list
    pub rank: usize,
}

// ============================================================================
// Requests
// ============================================================================

/// Query length bounds (characters).
pub const QUERY_MAX_CHARS: usize = 1000;
/// Result-count bounds.
pub const K_MIN: usize = 1;
pub const K_MAX: usize = 20;

/// Parameters for a retrieval or RAG request.
///
/// The auth edge supplies the caller's user id separately; it is never part
/// of the request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Natural-language query, 1..=1000 characters
    pub q: String,
    /// Results to return, 1..=20
    #[serde(default = "default_k")]
    pub k: usize,
    /// Retrieval strategy
    #[serde(default = "default_search_type")]
    pub search_type: SearchMode,
    /// Vector weight for hybrid fusion, 0..=1
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Generation model override
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature, 0..=2
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Completion budget, 100..=4000
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_k() -> usize {
    5
}

fn default_search_type() -> SearchMode {
    SearchMode::Hybrid
}

fn default_alpha() -> f64 {
    0.5
}

impl QueryRequest {
    /// A request with defaults for everything but the query text.
    #[must_use]
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            k: default_k(),
            search_type: default_search_type(),
            alpha: default_alpha(),
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Validate parameter bounds.
    ///
    /// Violations are input errors: reported verbatim to the caller, never
    /// logged as errors.
    pub fn validate(&self) -> Result<(), Error> {
        let q_len = self.q.chars().count();
        if q_len == 0 || self.q.trim().is_empty() {
            return Err(Error::InvalidParameter("query must not be empty".into()));
        }
        if q_len > QUERY_MAX_CHARS {
            return Err(Error::InvalidParameter(format!(
                "query too long: {q_len} chars (max {QUERY_MAX_CHARS})"
            )));
        }
        if !(K_MIN..=K_MAX).contains(&self.k) {
            return Err(Error::InvalidParameter(format!(
                "k must be in {K_MIN}..={K_MAX}, got {}",
                self.k
            )));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(Error::InvalidParameter(format!(
                "alpha must be in 0..=1, got {}",
                self.alpha
            )));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::InvalidParameter(format!(
                    "temperature must be in 0..=2, got {t}"
                )));
            }
        }
        if let Some(m) = self.max_tokens {
            if !(100..=4000).contains(&m) {
                return Err(Error::InvalidParameter(format!(
                    "max_tokens must be in 100..=4000, got {m}"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Token accounting reported by the generation provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A single generation call at the `Generator` seam.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System instruction
    pub system: String,
    /// User message (query + formatted context)
    pub user: String,
    /// Provider model name
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Completion token budget
    pub max_tokens: u32,
}

/// Non-streaming generation result.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Full answer text
    pub text: String,
    /// Provider-reported usage (zeroed when unavailable)
    pub usage: TokenUsage,
}

/// A citation marker bound to its source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationItem {
    /// The bracketed integer as it appears in the answer
    pub number: usize,
    pub chunk_id: i64,
    pub document_id: i64,
    pub document_filename: String,
    pub page_number: Option<i64>,
    pub chunk_index: i64,
    /// Retrieval score of the cited source
    pub score: f64,
    /// First 200 characters of the cited chunk
    pub content_preview: String,
}

/// Full RAG response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub query_id: String,
    pub query_text: String,
    pub answer: String,
    pub citations: Vec<CitationItem>,
    pub sources: Vec<SourceItem>,
    pub model: String,
    pub usage: TokenUsage,
    pub response_time_ms: f64,
    pub search_time_ms: f64,
    pub generation_time_ms: f64,
}

/// Retrieval-only response (no generation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub query_id: String,
    pub query_text: String,
    pub results: Vec<SourceItem>,
    pub result_count: usize,
    pub response_time_ms: f64,
}

/// Typed events emitted by a streaming RAG request, in order:
/// `status+ -> search_complete -> sources -> answer_chunk* -> citations ->
/// done`, with `error` replacing any later event and terminating the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RagEvent {
    Status {
        message: String,
    },
    SearchComplete {
        sources_found: usize,
        time_ms: f64,
    },
    Sources {
        sources: Vec<SourceItem>,
    },
    AnswerChunk {
        content: String,
    },
    Citations {
        citations: Vec<CitationItem>,
    },
    Done {
        query_id: String,
        response_time_ms: f64,
        search_time_ms: f64,
        generation_time_ms: f64,
    },
    Error {
        message: String,
    },
}

// ============================================================================
// Query log
// ============================================================================

/// One append-only query log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    /// Unique query identifier (UUID v4)
    pub query_id: String,
    pub user_id: i64,
    pub query_text: String,
    /// Requested result count
    pub k: usize,
    /// Returned result count
    pub result_count: usize,
    /// Per-result metadata (chunk id, document id, score, rank)
    pub results: serde_json::Value,
    pub response_time_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_status_roundtrip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::parse("queued"), None);
    }

    #[test]
    fn test_document_status_serde() {
        assert_eq!(
            serde_json::to_string(&DocumentStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&DocumentStatus::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn test_search_mode_from_str() {
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert_eq!(
            "fulltext".parse::<SearchMode>().unwrap(),
            SearchMode::Fulltext
        );
        assert!("keyword".parse::<SearchMode>().is_err());
    }

    #[test]
    fn test_query_request_defaults() {
        let req: QueryRequest = serde_json::from_str(r#"{"q": "what is rust"}"#).unwrap();
        assert_eq!(req.k, 5);
        assert_eq!(req.search_type, SearchMode::Hybrid);
        assert!((req.alpha - 0.5).abs() < f64::EPSILON);
        assert!(req.model.is_none());
        req.validate().unwrap();
    }

    #[test]
    fn test_query_request_empty_rejected() {
        assert!(QueryRequest::new("").validate().is_err());
        assert!(QueryRequest::new("   ").validate().is_err());
    }

    #[test]
    fn test_query_request_length_boundary() {
        let ok = QueryRequest::new("a".repeat(QUERY_MAX_CHARS));
        ok.validate().unwrap();

        let too_long = QueryRequest::new("a".repeat(QUERY_MAX_CHARS + 1));
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn test_query_request_k_bounds() {
        let mut req = QueryRequest::new("query");
        req.k = 1;
        req.validate().unwrap();
        req.k = 20;
        req.validate().unwrap();
        req.k = 0;
        assert!(req.validate().is_err());
        req.k = 21;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_query_request_sampling_bounds() {
        let mut req = QueryRequest::new("query");
        req.temperature = Some(2.0);
        req.max_tokens = Some(100);
        req.validate().unwrap();

        req.temperature = Some(2.1);
        assert!(req.validate().is_err());

        req.temperature = Some(0.3);
        req.max_tokens = Some(99);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_rag_event_tagging() {
        let event = RagEvent::AnswerChunk {
            content: "hello".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"answer_chunk\""));
        assert!(json.contains("\"content\":\"hello\""));

        let done = RagEvent::Done {
            query_id: "q".to_string(),
            response_time_ms: 1.0,
            search_time_ms: 0.5,
            generation_time_ms: 0.5,
        };
        let json = serde_json::to_string(&done).unwrap();
        assert!(json.contains("\"type\":\"done\""));
    }

    #[test]
    fn test_page_segment_constructors() {
        let paged = PageSegment::page(3, "text");
        assert_eq!(paged.page_number, Some(3));
        let unpaged = PageSegment::unpaged("text");
        assert_eq!(unpaged.page_number, None);
    }

    #[test]
    fn test_source_item_serde() {
        let item = SourceItem {
            chunk_id: 1,
            document_id: 2,
            document_filename: "report.pdf".to_string(),
            content: "body".to_string(),
            chunk_index: 0,
            page_number: Some(4),
            score: 0.9,
            rank: 1,
        };
        let json = serde_json::to_string(&item).unwrap();
        let back: SourceItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.chunk_id, 1);
        assert_eq!(back.rank, 1);
    }
}
