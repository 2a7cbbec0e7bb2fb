//! Citation extraction, validation, and binding.
//!
//! Generated answers cite sources with bracketed integers (`[1]`, `[2]`)
//! referring to the 1-based position of a retrieved source. The tracker
//! finds those markers, reports out-of-range ones, and binds each unique
//! in-range marker to its source metadata in first-appearance order.

use docrag_core::{CitationItem, SourceItem};
use regex::Regex;
use tracing::warn;

/// Characters of source content kept in a citation preview.
const PREVIEW_CHARS: usize = 200;

/// Tracks bracketed integer citations in generated text.
pub struct CitationTracker {
    pattern: Regex,
}

impl CitationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            // Compiles for any build; the pattern is a literal.
            pattern: Regex::new(r"\[(\d+)\]").expect("citation marker pattern"),
        }
    }

    /// All citation markers in order of appearance, duplicates included.
    #[must_use]
    pub fn extract(&self, text: &str) -> Vec<usize> {
        self.pattern
            .captures_iter(text)
            .filter_map(|cap| cap.get(1).and_then(|m| m.as_str().parse().ok()))
            .collect()
    }

    /// Check that every marker lies in `[1, source_count]`.
    ///
    /// Returns `(ok, violations)`; violations describe each out-of-range
    /// marker. Out-of-range markers never fail the request.
    #[must_use]
    pub fn validate(&self, text: &str, source_count: usize) -> (bool, Vec<String>) {
        let mut violations = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for number in self.extract(text) {
            if !seen.insert(number) {
                continue;
            }
            if number < 1 {
                violations.push(format!("invalid citation marker [{number}]: must be >= 1"));
            } else if number > source_count {
                violations.push(format!(
                    "citation [{number}] exceeds available sources (max [{source_count}])"
                ));
            }
        }

        (violations.is_empty(), violations)
    }

    /// Bind markers to sources: one [`CitationItem`] per unique in-range
    /// marker, in first-appearance order. Out-of-range markers are dropped
    /// with a warning.
    #[must_use]
    pub fn bind(&self, text: &str, sources: &[SourceItem]) -> Vec<CitationItem> {
        let mut seen = std::collections::HashSet::new();
        let mut citations = Vec::new();

        for number in self.extract(text) {
            if !seen.insert(number) {
                continue;
            }
            let Some(source) = number.checked_sub(1).and_then(|i| sources.get(i)) else {
                warn!(
                    "citation [{}] out of range (available sources: {})",
                    number,
                    sources.len()
                );
                continue;
            };
            citations.push(CitationItem {
                number,
                chunk_id: source.chunk_id,
                document_id: source.document_id,
                document_filename: source.document_filename.clone(),
                page_number: source.page_number,
                chunk_index: source.chunk_index,
                score: source.score,
                content_preview: preview(&source.content),
            });
        }

        citations
    }
}

impl Default for CitationTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn preview(content: &str) -> String {
    let truncated: String = content.chars().take(PREVIEW_CHARS).collect();
    if truncated.len() < content.len() {
        format!("{truncated}...")
    } else {
        truncated
    }
}
