//! RAG orchestration: retrieval, prompt assembly, generation, citation
//! binding, and the typed streaming event sequence.

use std::sync::Arc;
use std::time::Instant;

use docrag_core::{
    Error, GenerationRequest, Generator, QueryLogEntry, QueryRequest, RagEvent, RagResponse,
    RetrievalResponse, SourceItem, TokenUsage,
};
use docrag_search::HybridSearcher;
use docrag_store::MetadataStore;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::citations::CitationTracker;
use crate::prompt;

/// Streaming channel capacity. `send().await` on a full channel is the
/// back-pressure point for the LLM stream; events are never dropped.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Generation defaults applied when a request leaves them unset.
#[derive(Debug, Clone)]
pub struct RagDefaults {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for RagDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 1000,
        }
    }
}

/// Composes hybrid retrieval, prompt assembly, generation, and citation
/// tracking into full or streaming answers.
pub struct RagEngine {
    searcher: Arc<HybridSearcher>,
    generator: Arc<dyn Generator>,
    store: MetadataStore,
    citations: CitationTracker,
    defaults: RagDefaults,
}

impl RagEngine {
    pub fn new(
        searcher: Arc<HybridSearcher>,
        generator: Arc<dyn Generator>,
        store: MetadataStore,
        defaults: RagDefaults,
    ) -> Self {
        Self {
            searcher,
            generator,
            store,
            citations: CitationTracker::new(),
            defaults,
        }
    }

    /// Retrieval without generation.
    pub async fn retrieve(
        &self,
        request: &QueryRequest,
        user_id: i64,
    ) -> Result<RetrievalResponse, Error> {
        request.validate()?;
        let started = Instant::now();
        let query_id = Uuid::new_v4().to_string();

        let results = self
            .searcher
            .search(&request.q, request.k, request.search_type, request.alpha, user_id)
            .await?;

        let response_time_ms = elapsed_ms(started);
        self.log_query(&query_id, user_id, request, &results, response_time_ms)
            .await;

        Ok(RetrievalResponse {
            query_id,
            query_text: request.q.clone(),
            result_count: results.len(),
            results,
            response_time_ms,
        })
    }

    /// Answer a question over the user's corpus, non-streaming.
    pub async fn answer(
        &self,
        request: &QueryRequest,
        user_id: i64,
    ) -> Result<RagResponse, Error> {
        request.validate()?;
        let started = Instant::now();
        let query_id = Uuid::new_v4().to_string();

        info!(
            "rag request {} from user {}: '{}'",
            query_id,
            user_id,
            truncate(&request.q, 50)
        );

        let search_started = Instant::now();
        let sources = self
            .searcher
            .search(&request.q, request.k, request.search_type, request.alpha, user_id)
            .await?;
        let search_time_ms = elapsed_ms(search_started);

        if sources.is_empty() {
            // A deterministic refusal, not an error.
            return Ok(RagResponse {
                query_id,
                query_text: request.q.clone(),
                answer: prompt::NO_SOURCES_ANSWER.to_string(),
                citations: vec![],
                sources: vec![],
                model: self.model_for(request),
                usage: TokenUsage::default(),
                response_time_ms: elapsed_ms(started),
                search_time_ms,
                generation_time_ms: 0.0,
            });
        }

        let generation_started = Instant::now();
        let output = self
            .generator
            .generate(&self.generation_request(request, &sources))
            .await?;
        let generation_time_ms = elapsed_ms(generation_started);

        let (valid, violations) = self.citations.validate(&output.text, sources.len());
        if !valid {
            warn!("citation validation: {}", violations.join("; "));
        }
        let citations = self.citations.bind(&output.text, &sources);

        let response_time_ms = elapsed_ms(started);
        self.log_query(&query_id, user_id, request, &sources, response_time_ms)
            .await;

        info!(
            "rag request {} completed: {} citations in {:.2}ms",
            query_id,
            citations.len(),
            response_time_ms
        );

        Ok(RagResponse {
            query_id,
            query_text: request.q.clone(),
            answer: output.text,
            citations,
            sources,
            model: self.model_for(request),
            usage: output.usage,
            response_time_ms,
            search_time_ms,
            generation_time_ms,
        })
    }

    /// Answer a question as an ordered stream of typed events:
    /// `status+ -> search_complete -> sources -> answer_chunk* ->
    /// citations -> done`, with `error` replacing any later event.
    ///
    /// Dropping the receiver cancels the request: the LLM stream is
    /// aborted, a citations event for the text received so far is still
    /// flushed when at least one answer chunk was delivered, and no query
    /// log row is persisted.
    pub fn answer_stream(
        self: &Arc<Self>,
        request: QueryRequest,
        user_id: i64,
    ) -> Result<mpsc::Receiver<RagEvent>, Error> {
        request.validate()?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            engine.run_stream(request, user_id, tx).await;
        });

        Ok(rx)
    }

    async fn run_stream(
        &self,
        request: QueryRequest,
        user_id: i64,
        tx: mpsc::Sender<RagEvent>,
    ) {
        use futures::StreamExt;

        let started = Instant::now();
        let query_id = Uuid::new_v4().to_string();

        macro_rules! emit {
            ($event:expr) => {
                if tx.send($event).await.is_err() {
                    // Receiver gone: the request was cancelled.
                    return;
                }
            };
        }

        emit!(RagEvent::Status {
            message: "Searching documents...".to_string(),
        });

        let search_started = Instant::now();
        let sources = match self
            .searcher
            .search(&request.q, request.k, request.search_type, request.alpha, user_id)
            .await
        {
            Ok(sources) => sources,
            Err(e) => {
                error!("rag stream {} search failed: {e}", query_id);
                emit!(RagEvent::Error {
                    message: e.to_string(),
                });
                return;
            }
        };
        let search_time_ms = elapsed_ms(search_started);

        emit!(RagEvent::SearchComplete {
            sources_found: sources.len(),
            time_ms: search_time_ms,
        });

        if sources.is_empty() {
            emit!(RagEvent::AnswerChunk {
                content: prompt::NO_SOURCES_ANSWER.to_string(),
            });
            emit!(RagEvent::Citations { citations: vec![] });
            emit!(RagEvent::Done {
                query_id,
                response_time_ms: elapsed_ms(started),
                search_time_ms,
                generation_time_ms: 0.0,
            });
            return;
        }

        emit!(RagEvent::Sources {
            sources: sources.clone(),
        });
        emit!(RagEvent::Status {
            message: "Generating answer...".to_string(),
        });

        let generation_started = Instant::now();
        let mut stream = match self
            .generator
            .generate_stream(&self.generation_request(&request, &sources))
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                error!("rag stream {} generation failed: {e}", query_id);
                emit!(RagEvent::Error {
                    message: e.to_string(),
                });
                return;
            }
        };

        let mut answer = String::new();
        let mut chunks_sent = 0usize;
        let mut cancelled = false;

        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    answer.push_str(&fragment);
                    if tx
                        .send(RagEvent::AnswerChunk { content: fragment })
                        .await
                        .is_err()
                    {
                        cancelled = true;
                        break;
                    }
                    chunks_sent += 1;
                }
                Err(e) => {
                    error!("rag stream {} interrupted: {e}", query_id);
                    let _ = tx
                        .send(RagEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            }
        }
        // Dropping the stream aborts the provider request on cancellation.
        drop(stream);
        let generation_time_ms = elapsed_ms(generation_started);

        let (valid, violations) = self.citations.validate(&answer, sources.len());
        if !valid {
            warn!("citation validation: {}", violations.join("; "));
        }
        let citations = self.citations.bind(&answer, &sources);

        if cancelled {
            // Flush citations for the partial answer; skip done and the log.
            if chunks_sent > 0 {
                let _ = tx.send(RagEvent::Citations { citations }).await;
            }
            info!("rag stream {} cancelled after {} chunks", query_id, chunks_sent);
            return;
        }

        emit!(RagEvent::Citations { citations });

        let response_time_ms = elapsed_ms(started);
        self.log_query(&query_id, user_id, &request, &sources, response_time_ms)
            .await;

        emit!(RagEvent::Done {
            query_id,
            response_time_ms,
            search_time_ms,
            generation_time_ms,
        });
    }

    fn model_for(&self, request: &QueryRequest) -> String {
        request
            .model
            .clone()
            .unwrap_or_else(|| self.defaults.model.clone())
    }

    fn generation_request(
        &self,
        request: &QueryRequest,
        sources: &[SourceItem],
    ) -> GenerationRequest {
        let context = prompt::format_context(sources);
        GenerationRequest {
            system: prompt::system_prompt(),
            user: prompt::user_prompt(&request.q, &context),
            model: self.model_for(request),
            temperature: request.temperature.unwrap_or(self.defaults.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.defaults.max_tokens),
        }
    }

    /// Append the query log row; log failures are warnings, not errors.
    async fn log_query(
        &self,
        query_id: &str,
        user_id: i64,
        request: &QueryRequest,
        results: &[SourceItem],
        response_time_ms: f64,
    ) {
        let metadata: Vec<serde_json::Value> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "chunk_id": r.chunk_id,
                    "document_id": r.document_id,
                    "score": r.score,
                    "rank": r.rank,
                })
            })
            .collect();

        let entry = QueryLogEntry {
            query_id: query_id.to_string(),
            user_id,
            query_text: request.q.clone(),
            k: request.k,
            result_count: results.len(),
            results: serde_json::Value::Array(metadata),
            response_time_ms,
        };

        if let Err(e) = self.store.insert_query_log(&entry).await {
            warn!("failed to persist query log {}: {e}", query_id);
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
