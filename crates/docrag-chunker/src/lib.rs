//! # docrag-chunker
//!
//! Token-aware chunking with sentence boundary preservation.
//!
//! The chunker turns page-tagged extraction segments into an ordered list of
//! chunks, each at most `chunk_size` tokens, overlapping the previous chunk
//! by `chunk_overlap` tokens of trailing sentences, never crossing a segment
//! boundary, and never splitting mid-sentence unless a single sentence
//! exceeds `chunk_size` (in which case it becomes contiguous token windows
//! with the same overlap). Token counts use the `cl100k_base` BPE so they
//! line up with the embedding provider's accounting.

mod sentence;

use docrag_core::{ChunkError, ChunkPiece, PageSegment};
use tiktoken_rs::CoreBPE;
use tracing::debug;

pub use sentence::split_sentences;

/// Chunking parameters.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum tokens per chunk
    pub chunk_size: usize,
    /// Overlap tokens carried between consecutive chunks
    pub chunk_overlap: usize,
    /// Tail chunks below this merge into their predecessor
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            min_chunk_size: 100,
        }
    }
}

/// Sentence-aligned token chunker.
pub struct TokenChunker {
    config: ChunkerConfig,
    bpe: CoreBPE,
}

impl TokenChunker {
    /// Create a chunker, validating the configuration.
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkError> {
        if config.chunk_size == 0 {
            return Err(ChunkError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(ChunkError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| ChunkError::InvalidConfig(format!("tokenizer load failed: {e}")))?;
        Ok(Self { config, bpe })
    }

    /// Chunker with default parameters.
    pub fn with_defaults() -> Result<Self, ChunkError> {
        Self::new(ChunkerConfig::default())
    }

    /// Token count of a text under the embedding model's tokenizer.
    #[must_use]
    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Chunk a whole document's segments, assigning dense 0-based indices
    /// globally in order.
    ///
    /// An empty segment list yields zero chunks (legal). Segments that are
    /// present but tokenize to nothing is [`ChunkError::Empty`] — extraction
    /// succeeded yet produced nothing indexable.
    pub fn chunk_document(&self, segments: &[PageSegment]) -> Result<Vec<ChunkPiece>, ChunkError> {
        if segments.is_empty() {
            return Ok(vec![]);
        }

        let mut pieces = Vec::new();
        for segment in segments {
            let chunks = self.chunk_segment(&segment.text);
            for (content, token_count) in chunks {
                pieces.push(ChunkPiece {
                    content,
                    chunk_index: 0, // assigned below
                    page_number: segment.page_number,
                    token_count,
                });
            }
        }

        if pieces.is_empty() {
            return Err(ChunkError::Empty);
        }

        for (i, piece) in pieces.iter_mut().enumerate() {
            piece.chunk_index = i;
        }

        debug!("chunked {} segments into {} chunks", segments.len(), pieces.len());
        Ok(pieces)
    }

    /// Chunk one segment's text into `(content, token_count)` pairs.
    fn chunk_segment(&self, text: &str) -> Vec<(String, usize)> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return vec![];
        }

        let mut chunks: Vec<(String, usize)> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_tokens = 0usize;

        for sentence in sentences {
            let sentence_tokens = self.count_tokens(&sentence);

            // A sentence that alone exceeds the budget becomes token windows.
            if sentence_tokens > self.config.chunk_size {
                if !current.is_empty() {
                    let joined = current.join(" ");
                    let tokens = self.count_tokens(&joined);
                    chunks.push((joined, tokens));
                    current.clear();
                    current_tokens = 0;
                }
                chunks.extend(self.split_long_sentence(&sentence));
                continue;
            }

            if current_tokens + sentence_tokens > self.config.chunk_size && !current.is_empty() {
                let joined = current.join(" ");
                let tokens = self.count_tokens(&joined);
                chunks.push((joined, tokens));

                // Seed the next chunk with the trailing overlap sentences.
                let overlap = self.overlap_sentences(&current);
                current = overlap;
                current.push(sentence);
                current_tokens = self.count_tokens(&current.join(" "));
            } else {
                current.push(sentence);
                current_tokens += sentence_tokens;
            }
        }

        if !current.is_empty() {
            let joined = current.join(" ");
            let tokens = self.count_tokens(&joined);
            chunks.push((joined, tokens));
        }

        self.merge_small_tail(chunks)
    }

    /// Tail rule: a final chunk under `min_chunk_size` merges into the
    /// previous chunk unless it is the segment's only chunk.
    fn merge_small_tail(&self, mut chunks: Vec<(String, usize)>) -> Vec<(String, usize)> {
        if chunks.len() < 2 {
            return chunks;
        }
        let tail_small = chunks
            .last()
            .is_some_and(|(_, tokens)| *tokens < self.config.min_chunk_size);
        if tail_small {
            let (tail, _) = chunks.pop().unwrap_or_default();
            if let Some((prev, prev_tokens)) = chunks.last_mut() {
                prev.push(' ');
                prev.push_str(&tail);
                *prev_tokens = self.count_tokens(prev);
            }
        }
        chunks
    }

    /// Split an over-budget sentence into contiguous token windows stepping
    /// by `chunk_size - chunk_overlap`.
    fn split_long_sentence(&self, sentence: &str) -> Vec<(String, usize)> {
        let tokens = self.bpe.encode_ordinary(sentence);
        let step = self.config.chunk_size - self.config.chunk_overlap;
        let mut windows = Vec::new();

        let mut start = 0;
        while start < tokens.len() {
            let end = (start + self.config.chunk_size).min(tokens.len());
            let window = tokens[start..end].to_vec();
            let count = window.len();
            match self.bpe.decode(window) {
                Ok(text) => {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        windows.push((text, count));
                    }
                }
                Err(_) => {
                    // Window boundary split a multi-byte sequence; fall back
                    // to character windows for this sentence.
                    return self.split_long_sentence_by_chars(sentence);
                }
            }
            if end == tokens.len() {
                break;
            }
            start += step;
        }

        windows
    }

    /// Character-window fallback at ~4 chars per token.
    fn split_long_sentence_by_chars(&self, sentence: &str) -> Vec<(String, usize)> {
        let chars: Vec<char> = sentence.chars().collect();
        let window_chars = self.config.chunk_size * 4;
        let step = (self.config.chunk_size - self.config.chunk_overlap) * 4;
        let mut windows = Vec::new();

        let mut start = 0;
        while start < chars.len() {
            let end = (start + window_chars).min(chars.len());
            let text: String = chars[start..end].iter().collect();
            let text = text.trim().to_string();
            if !text.is_empty() {
                let count = self.count_tokens(&text);
                windows.push((text, count));
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }

        windows
    }

    /// Trailing sentences whose total token count fits in `chunk_overlap`.
    fn overlap_sentences(&self, sentences: &[String]) -> Vec<String> {
        let mut overlap = Vec::new();
        let mut tokens = 0usize;

        for sentence in sentences.iter().rev() {
            let sentence_tokens = self.count_tokens(sentence);
            if tokens + sentence_tokens > self.config.chunk_overlap {
                break;
            }
            overlap.insert(0, sentence.clone());
            tokens += sentence_tokens;
        }

        overlap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, overlap: usize, min: usize) -> TokenChunker {
        TokenChunker::new(ChunkerConfig {
            chunk_size,
            chunk_overlap: overlap,
            min_chunk_size: min,
        })
        .unwrap()
    }

    /// A sentence of roughly `n` tokens (one word is about one token).
    fn sentence_of(n: usize, tag: &str) -> String {
        let words: Vec<String> = (0..n).map(|i| format!("{tag}{i}")).collect();
        format!("{}.", words.join(" "))
    }

    /// A sentence of one word repeated `n` times: close to `n + 1` tokens.
    fn repeat_sentence(word: &str, n: usize) -> String {
        format!("{}.", vec![word; n].join(" "))
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(TokenChunker::new(ChunkerConfig {
            chunk_size: 0,
            chunk_overlap: 0,
            min_chunk_size: 0,
        })
        .is_err());

        assert!(TokenChunker::new(ChunkerConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            min_chunk_size: 10,
        })
        .is_err());
    }

    #[test]
    fn test_empty_input_yields_zero_chunks() {
        let chunker = chunker(512, 50, 100);
        let pieces = chunker.chunk_document(&[]).unwrap();
        assert!(pieces.is_empty());
    }

    #[test]
    fn test_whitespace_segments_are_empty_error() {
        let chunker = chunker(512, 50, 100);
        let segments = vec![PageSegment::unpaged("   \n  ")];
        assert!(matches!(
            chunker.chunk_document(&segments),
            Err(ChunkError::Empty)
        ));
    }

    #[test]
    fn test_single_short_segment_is_one_chunk() {
        let chunker = chunker(512, 50, 100);
        let segments = vec![PageSegment::unpaged("A short note. Nothing more.")];
        let pieces = chunker.chunk_document(&segments).unwrap();

        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].chunk_index, 0);
        assert!(pieces[0].content.contains("A short note."));
        assert!(pieces[0].token_count > 0);
    }

    #[test]
    fn test_chunks_respect_token_budget() {
        let chunker = chunker(64, 8, 4);
        let text: String = (0..12)
            .map(|i| sentence_of(20, &format!("w{i}x")))
            .collect::<Vec<_>>()
            .join(" ");
        let pieces = chunker
            .chunk_document(&[PageSegment::unpaged(text)])
            .unwrap();

        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(
                piece.token_count <= 64 + 4,
                "chunk of {} tokens exceeds budget",
                piece.token_count
            );
        }
    }

    #[test]
    fn test_indices_dense_and_global() {
        let chunker = chunker(64, 8, 4);
        let segments = vec![
            PageSegment::page(1, sentence_of(120, "alpha")),
            PageSegment::page(2, sentence_of(120, "beta")),
        ];
        let pieces = chunker.chunk_document(&segments).unwrap();

        for (i, piece) in pieces.iter().enumerate() {
            assert_eq!(piece.chunk_index, i);
        }
        // Page tags carry through from the source segment.
        assert_eq!(pieces.first().unwrap().page_number, Some(1));
        assert_eq!(pieces.last().unwrap().page_number, Some(2));
    }

    #[test]
    fn test_long_sentence_becomes_token_windows() {
        let chunker = chunker(32, 4, 4);
        // One sentence far beyond the budget.
        let long = sentence_of(200, "tok");
        let pieces = chunker
            .chunk_document(&[PageSegment::unpaged(long)])
            .unwrap();

        assert!(pieces.len() >= 2);
        for piece in &pieces {
            assert!(piece.token_count <= 32);
        }
    }

    #[test]
    fn test_overlap_carries_trailing_sentences() {
        let chunker = chunker(40, 8, 2);
        let text = format!(
            "{} {} {}",
            repeat_sentence("alpha", 30),
            repeat_sentence("bridge", 6),
            repeat_sentence("gamma", 30),
        );
        let pieces = chunker
            .chunk_document(&[PageSegment::unpaged(text)])
            .unwrap();

        assert!(pieces.len() >= 2);
        // The bridge sentence fits the overlap budget, so it opens chunk 2.
        assert!(pieces[1].content.starts_with("bridge"));
    }

    #[test]
    fn test_small_tail_merges_into_previous() {
        let chunker = chunker(40, 4, 10);
        let text = format!(
            "{} {} {}",
            repeat_sentence("alpha", 36),
            repeat_sentence("alpha", 36),
            repeat_sentence("tail", 3),
        );
        let pieces = chunker
            .chunk_document(&[PageSegment::unpaged(text)])
            .unwrap();

        // The 4-token tail is below min_chunk_size, so it folds into the
        // second chunk instead of standing alone.
        assert_eq!(pieces.len(), 2);
        assert!(pieces[1].content.contains("tail"));
        assert!(!pieces[0].content.contains("tail"));
    }

    #[test]
    fn test_small_only_chunk_survives() {
        let chunker = chunker(512, 50, 100);
        let segments = vec![PageSegment::unpaged("Tiny.")];
        let pieces = chunker.chunk_document(&segments).unwrap();
        assert_eq!(pieces.len(), 1);
    }

    #[test]
    fn test_segment_boundary_never_crossed() {
        let chunker = chunker(512, 50, 2);
        let segments = vec![
            PageSegment::page(1, "Page one text."),
            PageSegment::page(2, "Page two text."),
        ];
        let pieces = chunker.chunk_document(&segments).unwrap();

        assert_eq!(pieces.len(), 2);
        assert!(!pieces[0].content.contains("two"));
        assert!(!pieces[1].content.contains("one"));
    }

    #[test]
    fn test_token_roundtrip_preserves_text() {
        let chunker = chunker(64, 0, 2);
        let text: String = (0..8)
            .map(|i| sentence_of(20, &format!("rt{i}y")))
            .collect::<Vec<_>>()
            .join(" ");
        let pieces = chunker
            .chunk_document(&[PageSegment::unpaged(text.clone())])
            .unwrap();

        // With zero overlap, concatenating chunks reproduces the normalized
        // text up to whitespace.
        let rebuilt: String = pieces
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalize(&rebuilt), normalize(&text));
    }

    #[test]
    fn test_count_tokens_nonzero() {
        let chunker = chunker(512, 50, 100);
        assert!(chunker.count_tokens("hello world") >= 2);
        assert_eq!(chunker.count_tokens(""), 0);
    }
}
