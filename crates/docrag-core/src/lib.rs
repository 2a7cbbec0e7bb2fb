//! # docrag-core
//!
//! Core types and traits for docrag, a document intelligence platform.
//!
//! This crate provides the foundational abstractions used throughout docrag:
//!
//! - **Content Extraction**: [`Extractor`] trait for turning files into
//!   page-tagged text segments
//! - **Embedding Generation**: [`Embedder`] trait for converting text to
//!   vector embeddings
//! - **Answer Generation**: [`Generator`] trait for whole or streamed LLM
//!   completions
//!
//! ## Architecture
//!
//! The ingestion side is a pipeline:
//!
//! ```text
//! File -> Extractor -> TokenChunker -> Embedder -> FlatIndex + MetadataStore
//! ```
//!
//! The query side composes retrieval and generation:
//!
//! ```text
//! Query -> HybridSearcher -> prompt assembly -> Generator -> citations
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DocumentRecord`] | Metadata about an uploaded document |
//! | [`ChunkRecord`] | A persisted text chunk with embedding bookkeeping |
//! | [`PageSegment`] | A page-tagged slice of extracted text |
//! | [`SourceItem`] | An enriched, ranked search result |
//! | [`RagResponse`] | A generated answer with bound citations |
//! | [`RagEvent`] | Typed events for streaming RAG responses |
//!
//! ## Related Crates
//!
//! - `docrag-extract`: extractor adapters and the MIME registry
//! - `docrag-chunker`: token-aware sentence-aligned chunking
//! - `docrag-embed`: the batched embedding client
//! - `docrag-index`: the persistent flat vector index
//! - `docrag-store`: relational metadata and full-text search
//! - `docrag-search`: hybrid retrieval with reciprocal-rank fusion
//! - `docrag-rag`: answer generation, citations, streaming
//! - `docrag-worker`: the ingestion job queue and worker pool

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    ChunkError, EmbedError, Error, ExtractError, GenerateError, IndexError, IngestError, Result,
    SearchError, StoreError,
};
pub use traits::*;
pub use types::*;
