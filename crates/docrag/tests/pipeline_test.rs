//! Integration tests for the full docrag pipeline.
//!
//! Drives the real worker, searcher, and orchestrator against mock
//! embedding/generation providers: ingest -> hot reload -> cached hybrid
//! search -> invalidation -> cited answers.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use docrag_cache::Cache;
use docrag_chunker::{ChunkerConfig, TokenChunker};
use docrag_core::{
    DocumentStatus, EmbedError, Embedder, GenerateError, GenerationOutput, GenerationRequest,
    Generator, QueryRequest, SearchMode, TextStream,
};
use docrag_extract::{ExtractorRegistry, PdfExtractor, TextExtractor};
use docrag_index::FlatIndex;
use docrag_rag::{RagDefaults, RagEngine};
use docrag_search::{HybridSearcher, SearchConfig};
use docrag_store::{MetadataStore, NewDocument};
use docrag_worker::{run_job, IngestContext, IngestJob, JobOutcome};
use tempfile::TempDir;
use tokio::sync::{Mutex, RwLock};

const TEST_DIM: usize = 32;

/// Deterministic embedder: identical text embeds identically.
struct MockEmbedder;

impl MockEmbedder {
    fn embed_one(text: &str) -> Vec<f32> {
        let hash = blake3::hash(text.as_bytes());
        let bytes = hash.as_bytes();
        (0..TEST_DIM)
            .map(|i| (f32::from(bytes[i % 32]) / 255.0) - 0.5)
            .collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock-embedder"
    }

    fn dimension(&self) -> usize {
        TEST_DIM
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| Self::embed_one(t)).collect())
    }
}

/// Generator emitting a fixed script.
struct ScriptedGenerator {
    script: String,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> Result<GenerationOutput, GenerateError> {
        Ok(GenerationOutput {
            text: self.script.clone(),
            usage: docrag_core::TokenUsage {
                prompt_tokens: 20,
                completion_tokens: 10,
                total_tokens: 30,
            },
        })
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<TextStream, GenerateError> {
        let output = self.generate(request).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(output.text)
        })))
    }
}

struct Harness {
    dir: TempDir,
    store: MetadataStore,
    /// The search process's view of the index
    searcher_index: Arc<RwLock<FlatIndex>>,
    searcher: Arc<HybridSearcher>,
    /// The worker process's own view of the same index files
    ctx: Arc<IngestContext>,
    user: i64,
}

/// Build the full stack with two independent index instances over the same
/// on-disk pair, imitating the separate worker and search processes.
async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = MetadataStore::open(&dir.path().join("docrag.db")).await.unwrap();
    let cache = Arc::new(Cache::new());

    let searcher_index = Arc::new(RwLock::new(
        FlatIndex::open(dir.path(), "main", TEST_DIM, 0.2).unwrap(),
    ));
    let worker_index = Arc::new(RwLock::new(
        FlatIndex::open(dir.path(), "main", TEST_DIM, 0.2).unwrap(),
    ));

    let searcher = Arc::new(HybridSearcher::new(
        store.clone(),
        Arc::clone(&searcher_index),
        Arc::new(MockEmbedder) as Arc<dyn Embedder>,
        Arc::clone(&cache),
        SearchConfig::default(),
    ));

    let mut extractors = ExtractorRegistry::new();
    extractors.register("text", TextExtractor::new());
    extractors.register("pdf", PdfExtractor::new());

    let chunker = TokenChunker::new(ChunkerConfig {
        chunk_size: 512,
        chunk_overlap: 50,
        min_chunk_size: 2,
    })
    .unwrap();

    let ctx = Arc::new(IngestContext {
        store: store.clone(),
        index: worker_index,
        extractors: Arc::new(extractors),
        chunker: Arc::new(chunker),
        embedder: Arc::new(MockEmbedder) as Arc<dyn Embedder>,
        cache,
        save_mutex: Arc::new(Mutex::new(())),
        embedding_batch_size: 100,
    });

    let user = store.ensure_user("alice").await.unwrap();

    Harness {
        dir,
        store,
        searcher_index,
        searcher,
        ctx,
        user,
    }
}

/// Write a file, create its document row, and run the ingestion job.
async fn ingest_file(h: &Harness, name: &str, mime: &str, content: &[u8]) -> (i64, JobOutcome) {
    let path = h.dir.path().join(name);
    std::fs::write(&path, content).unwrap();

    let doc = h
        .store
        .create_document(&NewDocument {
            owner_id: h.user,
            filename: name.to_string(),
            original_filename: name.to_string(),
            file_path: path.to_string_lossy().into_owned(),
            file_size: content.len() as i64,
            mime_type: mime.to_string(),
            job_id: format!("job-{name}"),
        })
        .await
        .unwrap();

    let outcome = run_job(
        &h.ctx,
        &IngestJob {
            document_id: doc.id,
            job_id: doc.job_id.clone(),
        },
        0,
    )
    .await;
    (doc.id, outcome)
}

fn engine_with_script(h: &Harness, script: &str) -> Arc<RagEngine> {
    Arc::new(RagEngine::new(
        Arc::clone(&h.searcher),
        Arc::new(ScriptedGenerator {
            script: script.to_string(),
        }),
        h.store.clone(),
        RagDefaults::default(),
    ))
}

#[tokio::test]
async fn test_ingest_and_retrieve() {
    let h = harness().await;

    let first_sentence = "The migration plan moves the billing service onto the new cluster.";
    let content = format!(
        "{first_sentence} The rollout happens in three phases over six weeks. \
         Each phase ends with a verification checkpoint."
    );
    let (doc_id, outcome) = ingest_file(&h, "plan.txt", "text/plain", content.as_bytes()).await;
    assert!(matches!(outcome, JobOutcome::Completed(_)));

    let doc = h.store.get_document(doc_id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Completed);

    // One small file, one chunk, one vector.
    let chunks = h.store.chunks_for_document(doc_id).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].has_embedding);
    assert_eq!(h.ctx.index.read().await.live(), 1);

    // Hybrid search with the first sentence finds the chunk at rank 1.
    let results = h
        .searcher
        .search(first_sentence, 5, SearchMode::Hybrid, 0.5, h.user)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_id, chunks[0].id);
    assert_eq!(results[0].rank, 1);
    assert_eq!(results[0].document_filename, "plan.txt");
}

#[tokio::test]
async fn test_hot_reload_without_restart() {
    let h = harness().await;
    let query = "observability dashboards for the payments team";

    // The searcher starts against an empty index.
    let before = h
        .searcher
        .search(query, 5, SearchMode::Hybrid, 0.5, h.user)
        .await
        .unwrap();
    assert!(before.is_empty());

    // The worker ingests through its own index instance and save()
    // advances the on-disk pair.
    let (_, outcome) = ingest_file(
        &h,
        "dashboards.txt",
        "text/plain",
        b"Observability dashboards for the payments team live in the shared grafana folder.",
    )
    .await;
    assert!(matches!(outcome, JobOutcome::Completed(_)));

    // Re-issuing the query picks up the new document without any restart.
    let reloads_before = h.searcher_index.read().await.reload_count();
    let after = h
        .searcher
        .search(query, 5, SearchMode::Hybrid, 0.5, h.user)
        .await
        .unwrap();
    assert_eq!(after.len(), 1);
    assert!(after[0].content.contains("grafana"));
    assert_eq!(
        h.searcher_index.read().await.reload_count(),
        reloads_before + 1
    );

    // Stable mtime: a further search must not reload.
    let _ = h
        .searcher
        .search(query, 5, SearchMode::Hybrid, 0.5, h.user)
        .await
        .unwrap();
    assert_eq!(
        h.searcher_index.read().await.reload_count(),
        reloads_before + 1
    );
}

#[tokio::test]
async fn test_query_cache_hit_then_invalidation_on_ingest() {
    let h = harness().await;
    let query = "incident response runbook steps";

    ingest_file(
        &h,
        "runbook.txt",
        "text/plain",
        b"The incident response runbook steps start with paging the on-call engineer.",
    )
    .await;

    let first = h
        .searcher
        .search(query, 5, SearchMode::Hybrid, 0.5, h.user)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    // Identical repeat: served from the query cache.
    let hits_before = h.searcher.cache_stats().hits;
    let second = h
        .searcher
        .search(query, 5, SearchMode::Hybrid, 0.5, h.user)
        .await
        .unwrap();
    assert!(h.searcher.cache_stats().hits > hits_before);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    // Ingesting another document for the same user evicts the cache, and
    // the re-issued query reflects the new corpus.
    ingest_file(
        &h,
        "runbook2.txt",
        "text/plain",
        b"Additional incident response runbook steps cover postmortem scheduling.",
    )
    .await;

    let hits_after_ingest = h.searcher.cache_stats().hits;
    let third = h
        .searcher
        .search(query, 5, SearchMode::Hybrid, 0.5, h.user)
        .await
        .unwrap();
    assert_eq!(
        h.searcher.cache_stats().hits, hits_after_ingest,
        "post-ingest query must not be served from cache"
    );
    assert_eq!(third.len(), 2);
}

#[tokio::test]
async fn test_failed_ingestion_leaves_no_trace() {
    let h = harness().await;

    let (doc_id, outcome) =
        ingest_file(&h, "broken.pdf", "application/pdf", b"not a pdf at all").await;
    assert!(matches!(outcome, JobOutcome::Failed(_)));

    // pending -> processing -> failed, with a recorded error.
    let doc = h.store.get_document(doc_id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.error_message.as_deref().is_some_and(|m| !m.is_empty()));

    // No chunks, no vector slots.
    assert!(h.store.chunks_for_document(doc_id).await.unwrap().is_empty());
    assert_eq!(h.ctx.index.read().await.total(), 0);

    // A search for its would-be content returns empty.
    let results = h
        .searcher
        .search("not a pdf at all", 5, SearchMode::Hybrid, 0.5, h.user)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_rag_answer_with_citations_end_to_end() {
    let h = harness().await;

    ingest_file(
        &h,
        "policies.txt",
        "text/plain",
        b"Expense reports are due on the fifth business day of each month.",
    )
    .await;
    ingest_file(
        &h,
        "travel.txt",
        "text/plain",
        b"Travel bookings must go through the corporate portal for reimbursement.",
    )
    .await;

    let engine = engine_with_script(
        &h,
        "Reports are due on the fifth business day [1]. Bookings use the portal [2].",
    );

    let mut request = QueryRequest::new("expense reports and travel bookings policy");
    request.k = 5;
    let response = engine.answer(&request, h.user).await.unwrap();

    assert_eq!(response.sources.len(), 2);
    assert_eq!(response.citations.len(), 2);
    assert_eq!(response.citations[0].number, 1);
    assert_eq!(response.citations[1].number, 2);
    // Citations bind to the same chunks the sources list carries.
    assert_eq!(response.citations[0].chunk_id, response.sources[0].chunk_id);
    assert_eq!(response.usage.total_tokens, 30);

    // The query was logged.
    assert_eq!(h.store.query_log_count(h.user).await.unwrap(), 1);
}

#[tokio::test]
async fn test_retrieval_endpoint_shape() {
    let h = harness().await;
    ingest_file(
        &h,
        "kb.txt",
        "text/plain",
        b"Kubernetes upgrades roll one node pool at a time.",
    )
    .await;

    let engine = engine_with_script(&h, "unused");
    let mut request = QueryRequest::new("kubernetes upgrades");
    request.k = 3;

    let response = engine.retrieve(&request, h.user).await.unwrap();
    assert_eq!(response.result_count, response.results.len());
    assert_eq!(response.query_text, "kubernetes upgrades");
    assert!(!response.query_id.is_empty());
    assert_eq!(response.results[0].rank, 1);
}
