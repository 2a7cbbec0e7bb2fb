//! # docrag-rag
//!
//! Retrieval-augmented generation for docrag: prompt assembly over retrieved
//! sources, whole or streamed answer generation through the
//! [`docrag_core::Generator`] seam, citation extraction and binding, and the
//! typed event stream with back-pressure.

mod citations;
mod generator;
mod orchestrator;
pub mod prompt;

pub use citations::CitationTracker;
pub use generator::{GenClientConfig, OpenAiGenerator};
pub use orchestrator::{RagDefaults, RagEngine};
