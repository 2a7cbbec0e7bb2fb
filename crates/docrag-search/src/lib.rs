//! # docrag-search
//!
//! Hybrid retrieval over the vector index and the lexical index.
//!
//! A hybrid search runs both branches in parallel, converts each branch's
//! hits to 1-based ranks, and fuses by reciprocal rank:
//!
//! ```text
//! rrf(chunk) = alpha * 1/(c + rank_vector) + (1 - alpha) * 1/(c + rank_lexical)
//! ```
//!
//! with `c = 60` and a zero term for a chunk absent from one branch. Vector
//! and full-text modes skip the other branch and keep that branch's native
//! score. Results are enriched with document metadata and cached per user;
//! the ingestion worker evicts a user's cached results when a document
//! completes or fails.
//!
//! A branch failure during hybrid search degrades to an empty list from
//! that branch; only when no branch succeeds does the searcher return
//! [`SearchError::Unavailable`].

use std::sync::Arc;
use std::time::Duration;

use docrag_cache::{embedding_key, query_key, query_user_prefix, Cache};
use docrag_core::{EmbedError, Embedder, SearchError, SearchMode, SourceItem};
use docrag_index::FlatIndex;
use docrag_store::{ChunkHit, LexicalHit, MetadataStore};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Retrieval tuning parameters.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Default k when the caller does not specify one
    pub topk_default: usize,
    /// Per-branch over-fetch factor (`k_branch = k * multiplier`)
    pub branch_multiplier: usize,
    /// Per-branch over-fetch ceiling
    pub branch_cap: usize,
    /// RRF constant `c`
    pub rrf_constant: u32,
    /// TTL for cached query results
    pub query_cache_ttl: Duration,
    /// TTL for cached query embeddings
    pub embedding_cache_ttl: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            topk_default: 5,
            branch_multiplier: 4,
            branch_cap: 100,
            rrf_constant: 60,
            query_cache_ttl: Duration::from_secs(3600),
            embedding_cache_ttl: Duration::from_secs(86_400),
        }
    }
}

/// One branch hit before fusion.
struct BranchHit {
    hit: ChunkHit,
    score: f64,
}

/// Hybrid searcher over the vector and lexical indices.
pub struct HybridSearcher {
    store: MetadataStore,
    index: Arc<RwLock<FlatIndex>>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<Cache>,
    config: SearchConfig,
}

impl HybridSearcher {
    pub fn new(
        store: MetadataStore,
        index: Arc<RwLock<FlatIndex>>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<Cache>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            cache,
            config,
        }
    }

    /// Top-k retrieval for a user.
    ///
    /// Results are ordered by descending score with no duplicates and carry
    /// 1-based ranks. Only chunks owned by `user_id` ever appear.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        mode: SearchMode,
        alpha: f64,
        user_id: i64,
    ) -> Result<Vec<SourceItem>, SearchError> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }

        let cache_key = self.result_cache_key(query, k, mode, alpha, user_id);
        if let Some(bytes) = self.cache.get(&cache_key).await {
            match serde_json::from_slice::<Vec<SourceItem>>(&bytes) {
                Ok(results) => {
                    debug!("query cache hit for '{}'", truncate(query, 50));
                    return Ok(results);
                }
                Err(e) => warn!("discarding undecodable cached results: {e}"),
            }
        }

        let k_branch = (k * self.config.branch_multiplier).min(self.config.branch_cap);

        let results = match mode {
            SearchMode::Vector => {
                let hits = self.vector_branch(query, k_branch, user_id).await.map_err(
                    |e| {
                        warn!("vector search failed: {e}");
                        SearchError::Unavailable
                    },
                )?;
                rank_native(hits, k)
            }
            SearchMode::Fulltext => {
                let hits = self.lexical_branch(query, k_branch, user_id).await.map_err(
                    |e| {
                        warn!("full-text search failed: {e}");
                        SearchError::Unavailable
                    },
                )?;
                rank_native(hits, k)
            }
            SearchMode::Hybrid => {
                let (vector, lexical) = tokio::join!(
                    self.vector_branch(query, k_branch, user_id),
                    self.lexical_branch(query, k_branch, user_id),
                );

                let vector = vector.unwrap_or_else(|e| {
                    warn!("vector branch failed, fusing lexical only: {e}");
                    None
                });
                let lexical = lexical.unwrap_or_else(|e| {
                    warn!("lexical branch failed, fusing vector only: {e}");
                    None
                });

                match (vector, lexical) {
                    (None, None) => return Err(SearchError::Unavailable),
                    (vector, lexical) => fuse_rrf(
                        vector.unwrap_or_default(),
                        lexical.unwrap_or_default(),
                        alpha,
                        self.config.rrf_constant,
                        k,
                    ),
                }
            }
        };

        info!(
            "search '{}' ({}, k={}) returned {} results",
            truncate(query, 50),
            mode,
            k,
            results.len()
        );

        if !results.is_empty() {
            match serde_json::to_vec(&results) {
                Ok(bytes) => {
                    self.cache
                        .set(&cache_key, bytes, self.config.query_cache_ttl)
                        .await;
                }
                Err(e) => warn!("failed to serialize results for cache: {e}"),
            }
        }

        Ok(results)
    }

    /// Evict every cached query result belonging to a user. Called by the
    /// ingestion worker before it completes or fails a document.
    pub async fn invalidate_user(&self, user_id: i64) -> usize {
        let removed = self.cache.delete_prefix(&query_user_prefix(user_id)).await;
        if removed > 0 {
            info!("invalidated {} cached queries for user {}", removed, user_id);
        }
        removed
    }

    /// Cache statistics pass-through, for instrumentation.
    #[must_use]
    pub fn cache_stats(&self) -> docrag_cache::CacheStats {
        self.cache.stats()
    }

    fn result_cache_key(
        &self,
        query: &str,
        k: usize,
        mode: SearchMode,
        alpha: f64,
        user_id: i64,
    ) -> String {
        let payload = format!("{query}|{k}|{mode}|{alpha}");
        query_key(user_id, &blake3::hash(payload.as_bytes()).to_hex())
    }

    /// Vector branch: embed the query (through the embedding cache), search
    /// the index after a staleness check, then join the candidate ids back
    /// to chunk ownership.
    async fn vector_branch(
        &self,
        query: &str,
        k_branch: usize,
        user_id: i64,
    ) -> Result<Option<Vec<BranchHit>>, SearchError> {
        let embedding = self.query_embedding(query).await?;

        // Cheap stat first; take the write lock only when the file moved.
        let stale = self.index.read().await.is_stale();
        if stale {
            let mut index = self.index.write().await;
            if let Err(e) = index.reload_if_stale() {
                warn!("vector index reload failed: {e}");
                return Err(SearchError::Unavailable);
            }
        }

        let raw = {
            let index = self.index.read().await;
            index.search(&embedding, k_branch).map_err(|e| {
                warn!("vector search failed: {e}");
                SearchError::Unavailable
            })?
        };

        if raw.is_empty() {
            return Ok(Some(vec![]));
        }

        let ids: Vec<i64> = raw.iter().map(|(id, _)| *id).collect();
        let owned = self.store.owned_chunk_hits(&ids, user_id).await?;

        // Distance -> similarity in (0, 1], preserving distance order.
        let similarity: std::collections::HashMap<i64, f64> = raw
            .iter()
            .map(|(id, dist)| (*id, 1.0 / (1.0 + f64::from(*dist))))
            .collect();

        Ok(Some(
            owned
                .into_iter()
                .map(|hit| {
                    let score = similarity.get(&hit.chunk_id).copied().unwrap_or(0.0);
                    BranchHit { hit, score }
                })
                .collect(),
        ))
    }

    async fn lexical_branch(
        &self,
        query: &str,
        k_branch: usize,
        user_id: i64,
    ) -> Result<Option<Vec<BranchHit>>, SearchError> {
        let hits = self.store.lexical_search(query, k_branch, user_id).await?;
        Ok(Some(hits.into_iter().map(branch_hit_from_lexical).collect()))
    }

    /// Query embedding with a 24-hour cache keyed by the query hash.
    async fn query_embedding(&self, query: &str) -> Result<Vec<f32>, EmbedError> {
        let key = embedding_key(&blake3::hash(query.as_bytes()).to_hex());

        if let Some(bytes) = self.cache.get(&key).await {
            if let Some(vector) = bytes_to_vec(&bytes) {
                if vector.len() == self.embedder.dimension() {
                    debug!("embedding cache hit for '{}'", truncate(query, 50));
                    return Ok(vector);
                }
            }
            warn!("discarding undecodable cached embedding");
        }

        let vector = self.embedder.embed_query(query).await?;
        self.cache
            .set(&key, vec_to_bytes(&vector), self.config.embedding_cache_ttl)
            .await;
        Ok(vector)
    }
}

fn branch_hit_from_lexical(hit: LexicalHit) -> BranchHit {
    BranchHit {
        hit: ChunkHit {
            chunk_id: hit.chunk_id,
            document_id: hit.document_id,
            document_filename: hit.document_filename,
            content: hit.content,
            chunk_index: hit.chunk_index,
            page_number: hit.page_number,
        },
        score: hit.score,
    }
}

/// Single-branch modes keep the branch's native score.
fn rank_native(hits: Option<Vec<BranchHit>>, k: usize) -> Vec<SourceItem> {
    let mut hits = hits.unwrap_or_default();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.hit.chunk_id.cmp(&b.hit.chunk_id))
    });
    hits.truncate(k);
    to_source_items(hits)
}

/// Reciprocal-rank fusion of the two branch result lists.
fn fuse_rrf(
    vector: Vec<BranchHit>,
    lexical: Vec<BranchHit>,
    alpha: f64,
    rrf_constant: u32,
    k: usize,
) -> Vec<SourceItem> {
    let c = f64::from(rrf_constant);
    let mut fused: std::collections::HashMap<i64, (ChunkHit, f64)> = std::collections::HashMap::new();

    for (rank, branch_hit) in vector.into_iter().enumerate() {
        let term = alpha * (1.0 / (c + (rank + 1) as f64));
        fused
            .entry(branch_hit.hit.chunk_id)
            .and_modify(|(_, score)| *score += term)
            .or_insert((branch_hit.hit, term));
    }

    for (rank, branch_hit) in lexical.into_iter().enumerate() {
        let term = (1.0 - alpha) * (1.0 / (c + (rank + 1) as f64));
        fused
            .entry(branch_hit.hit.chunk_id)
            .and_modify(|(_, score)| *score += term)
            .or_insert((branch_hit.hit, term));
    }

    let mut merged: Vec<BranchHit> = fused
        .into_values()
        .map(|(hit, score)| BranchHit { hit, score })
        .collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.hit.chunk_id.cmp(&b.hit.chunk_id))
    });
    merged.truncate(k);
    to_source_items(merged)
}

fn to_source_items(hits: Vec<BranchHit>) -> Vec<SourceItem> {
    hits.into_iter()
        .enumerate()
        .map(|(i, branch_hit)| SourceItem {
            chunk_id: branch_hit.hit.chunk_id,
            document_id: branch_hit.hit.document_id,
            document_filename: branch_hit.hit.document_filename,
            content: branch_hit.hit.content,
            chunk_index: branch_hit.hit.chunk_index,
            page_number: branch_hit.hit.page_number,
            score: branch_hit.score,
            rank: i + 1,
        })
        .collect()
}

/// Little-endian f32 serialization for cached embeddings.
#[must_use]
pub fn vec_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Inverse of [`vec_to_bytes`]; `None` for a torn payload.
#[must_use]
pub fn bytes_to_vec(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
