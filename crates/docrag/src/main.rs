//! # docrag CLI
//!
//! Command-line interface for docrag, a document intelligence platform:
//! ingest files into embedded, searchable chunks and ask questions over
//! them with cited answers.
//!
//! ## Commands
//!
//! - `docrag ingest <FILE> --user <NAME>` - upload and process a document
//! - `docrag query <TEXT> --user <NAME>` - retrieval only, no generation
//! - `docrag ask <TEXT> --user <NAME>` - generate a cited answer
//! - `docrag status <ID>` / `docrag chunks <ID>` - inspect a document
//! - `docrag delete <ID>` / `docrag retry <ID>` / `docrag purge` - maintenance
//!
//! The binary is the composition root: every component is constructed once
//! here and handed to its dependents as an explicit `Arc` handle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docrag_cache::Cache;
use docrag_chunker::{ChunkerConfig, TokenChunker};
use docrag_core::{DocumentStatus, Embedder, Generator, QueryRequest, RagEvent, SearchMode};
use docrag_embed::{EmbedClientConfig, OpenAiEmbedder};
use docrag_extract::{
    AudioExtractor, ExtractorRegistry, ImageExtractor, OfficeExtractor, PdfExtractor,
    TextExtractor,
};
use docrag_index::FlatIndex;
use docrag_rag::{GenClientConfig, OpenAiGenerator, RagDefaults, RagEngine};
use docrag_search::{HybridSearcher, SearchConfig};
use docrag_store::{MetadataStore, NewDocument};
use docrag_worker::{IngestContext, IngestJob, IngestWorkerPool, WorkerConfig};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "docrag")]
#[command(about = "Ask questions over your documents with cited answers")]
#[command(version)]
struct Cli {
    /// Path to config file (default: platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file and process it into searchable chunks
    Ingest {
        /// File to ingest
        file: PathBuf,

        /// Owning user
        #[arg(short, long)]
        user: String,

        /// MIME type (guessed from the extension when omitted)
        #[arg(short, long)]
        mime: Option<String>,
    },

    /// Retrieve matching chunks without generating an answer
    Query {
        /// Query text
        text: String,

        /// Requesting user
        #[arg(short, long)]
        user: String,

        /// Results to return (1-20)
        #[arg(short, long, default_value = "5")]
        k: usize,

        /// Search mode: vector, fulltext, or hybrid
        #[arg(short, long, default_value = "hybrid")]
        mode: SearchMode,

        /// Vector weight for hybrid fusion (0-1)
        #[arg(short, long, default_value = "0.5")]
        alpha: f64,
    },

    /// Generate a cited answer from the user's documents
    Ask {
        /// Question text
        text: String,

        /// Requesting user
        #[arg(short, long)]
        user: String,

        /// Results to retrieve (1-20)
        #[arg(short, long, default_value = "5")]
        k: usize,

        /// Search mode: vector, fulltext, or hybrid
        #[arg(short, long, default_value = "hybrid")]
        mode: SearchMode,

        /// Vector weight for hybrid fusion (0-1)
        #[arg(short, long, default_value = "0.5")]
        alpha: f64,

        /// Generation model override
        #[arg(long)]
        model: Option<String>,

        /// Sampling temperature (0-2)
        #[arg(long)]
        temperature: Option<f32>,

        /// Completion token budget (100-4000)
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Stream the answer as it generates
        #[arg(short, long)]
        stream: bool,
    },

    /// Show a document's lifecycle record
    Status {
        /// Document id
        id: i64,
    },

    /// List a document's chunks in index order
    Chunks {
        /// Document id
        id: i64,
    },

    /// Delete a document, its chunks, and its vector slots
    Delete {
        /// Document id
        id: i64,
    },

    /// Re-submit a failed document for processing
    Retry {
        /// Document id
        id: i64,
    },

    /// Remove failed documents older than a cutoff
    Purge {
        /// Age cutoff in days
        #[arg(long, default_value = "7")]
        days: i64,
    },
}

/// Everything the commands need, constructed once.
struct App {
    config: Config,
    store: MetadataStore,
    engine: Arc<RagEngine>,
    ingest: Arc<IngestContext>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let config = Config::load(cli.config.as_deref())?;
    let app = build_app(config).await?;

    match cli.command {
        Commands::Ingest { file, user, mime } => cmd_ingest(&app, &file, &user, mime).await,
        Commands::Query {
            text,
            user,
            k,
            mode,
            alpha,
        } => cmd_query(&app, &text, &user, k, mode, alpha, cli.format).await,
        Commands::Ask {
            text,
            user,
            k,
            mode,
            alpha,
            model,
            temperature,
            max_tokens,
            stream,
        } => {
            let mut request = QueryRequest::new(text);
            request.k = k;
            request.search_type = mode;
            request.alpha = alpha;
            request.model = model;
            request.temperature = temperature;
            request.max_tokens = max_tokens;
            cmd_ask(&app, request, &user, stream, cli.format).await
        }
        Commands::Status { id } => cmd_status(&app, id, cli.format).await,
        Commands::Chunks { id } => cmd_chunks(&app, id, cli.format).await,
        Commands::Delete { id } => cmd_delete(&app, id).await,
        Commands::Retry { id } => cmd_retry(&app, id).await,
        Commands::Purge { days } => cmd_purge(&app, days).await,
    }
}

/// Composition root: construct each component once, pass handles explicitly.
async fn build_app(config: Config) -> Result<App> {
    let data_dir = config.storage.resolved_data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {data_dir:?}"))?;

    let store = MetadataStore::open(&config.storage.db_path())
        .await
        .context("failed to open metadata store")?;

    let indexes_dir = config.storage.indexes_dir();
    std::fs::create_dir_all(&indexes_dir)?;
    let index = Arc::new(tokio::sync::RwLock::new(FlatIndex::open(
        &indexes_dir,
        &config.index.scope,
        config.embedding.dimension,
        config.index.compaction_tombstone_ratio,
    )?));

    let cache = Arc::new(Cache::new());

    let api_key = |env_name: &str| std::env::var(env_name).unwrap_or_default();

    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(EmbedClientConfig {
        base_url: config.embedding.base_url.clone(),
        api_key: api_key(&config.embedding.api_key_env),
        model: config.embedding.model.clone(),
        dimension: config.embedding.dimension,
        timeout: Duration::from_secs(config.embedding.timeout_secs),
    })?);

    let generator: Arc<dyn Generator> = Arc::new(OpenAiGenerator::new(GenClientConfig {
        base_url: config.generation.base_url.clone(),
        api_key: api_key(&config.generation.api_key_env),
        timeout: Duration::from_secs(config.generation.timeout_secs),
    })?);

    let extract_timeout = Duration::from_secs(config.extract.timeout_secs);
    let mut extractors = ExtractorRegistry::new();
    extractors.register("text", TextExtractor::new());
    extractors.register("pdf", PdfExtractor::new());
    extractors.register("office", OfficeExtractor::new());
    extractors.register(
        "image",
        ImageExtractor::new(&config.extract.tesseract_path, extract_timeout),
    );
    extractors.register(
        "audio",
        AudioExtractor::new(
            config.embedding.base_url.clone(),
            api_key(&config.embedding.api_key_env),
            config.extract.transcription_model.clone(),
            extract_timeout,
        )?,
    );

    let chunker = TokenChunker::new(ChunkerConfig {
        chunk_size: config.chunking.chunk_size,
        chunk_overlap: config.chunking.chunk_overlap,
        min_chunk_size: config.chunking.min_chunk_size,
    })?;

    let search_config: SearchConfig = config.search.to_search_config();
    let searcher = Arc::new(HybridSearcher::new(
        store.clone(),
        Arc::clone(&index),
        Arc::clone(&embedder),
        Arc::clone(&cache),
        search_config,
    ));

    let engine = Arc::new(RagEngine::new(
        Arc::clone(&searcher),
        generator,
        store.clone(),
        RagDefaults {
            model: config.generation.model.clone(),
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
        },
    ));

    let ingest = Arc::new(IngestContext {
        store: store.clone(),
        index,
        extractors: Arc::new(extractors),
        chunker: Arc::new(chunker),
        embedder,
        cache,
        save_mutex: Arc::new(tokio::sync::Mutex::new(())),
        embedding_batch_size: config.embedding.batch_size,
    });

    Ok(App {
        config,
        store,
        engine,
        ingest,
    })
}

fn require_api_key(env_name: &str) -> Result<()> {
    if std::env::var(env_name).map(|v| v.is_empty()).unwrap_or(true) {
        bail!("set {env_name} to use the embedding/generation provider");
    }
    Ok(())
}

async fn cmd_ingest(app: &App, file: &PathBuf, user: &str, mime: Option<String>) -> Result<()> {
    require_api_key(&app.config.embedding.api_key_env)?;

    if !file.is_file() {
        bail!("no such file: {}", file.display());
    }
    let original_filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("file has no name")?;

    let mime_type = match mime {
        Some(m) => m,
        None => guess_mime(file).with_context(|| {
            format!("cannot guess MIME type for {original_filename}; pass --mime")
        })?,
    };

    let user_id = app.store.ensure_user(user).await?;
    let job_id = Uuid::new_v4().to_string();

    // Owner-isolated storage; the job id prefix keeps stored files from
    // ever being overwritten.
    let uploads = app.config.storage.uploads_dir(user_id);
    std::fs::create_dir_all(&uploads)?;
    let stored_name = format!("{job_id}_{original_filename}");
    let stored_path = uploads.join(&stored_name);
    std::fs::copy(file, &stored_path)?;
    let file_size = std::fs::metadata(&stored_path)?.len() as i64;

    let doc = app
        .store
        .create_document(&NewDocument {
            owner_id: user_id,
            filename: stored_name,
            original_filename,
            file_path: stored_path.to_string_lossy().into_owned(),
            file_size,
            mime_type,
            job_id: job_id.clone(),
        })
        .await?;

    println!("document {} queued (job {})", doc.id, job_id);

    let pool = IngestWorkerPool::start(
        Arc::clone(&app.ingest),
        &WorkerConfig {
            pool_size: app.config.worker.pool_size,
            queue_capacity: app.config.worker.queue_capacity,
        },
    );
    pool.submit(IngestJob {
        document_id: doc.id,
        job_id,
    })
    .await;
    pool.shutdown().await;

    let done = app
        .store
        .get_document(doc.id)
        .await?
        .context("document vanished during processing")?;
    match done.status {
        DocumentStatus::Completed => {
            let chunks = app.store.chunks_for_document(doc.id).await?;
            println!("document {} completed: {} chunks", doc.id, chunks.len());
        }
        DocumentStatus::Failed => {
            bail!(
                "document {} failed: {}",
                doc.id,
                done.error_message.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        other => println!("document {} is {}", doc.id, other),
    }
    Ok(())
}

async fn cmd_query(
    app: &App,
    text: &str,
    user: &str,
    k: usize,
    mode: SearchMode,
    alpha: f64,
    format: OutputFormat,
) -> Result<()> {
    require_api_key(&app.config.embedding.api_key_env)?;
    let user_id = app.store.ensure_user(user).await?;

    let mut request = QueryRequest::new(text);
    request.k = k;
    request.search_type = mode;
    request.alpha = alpha;

    let response = app.engine.retrieve(&request, user_id).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Text => {
            if response.results.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for result in &response.results {
                let page = result
                    .page_number
                    .map(|p| format!(", page {p}"))
                    .unwrap_or_default();
                println!(
                    "{}. [{:.4}] {}{}",
                    result.rank, result.score, result.document_filename, page
                );
                println!("   {}", preview_line(&result.content, 160));
            }
            println!(
                "{} results in {:.1}ms",
                response.result_count, response.response_time_ms
            );
        }
    }
    Ok(())
}

async fn cmd_ask(
    app: &App,
    request: QueryRequest,
    user: &str,
    stream: bool,
    format: OutputFormat,
) -> Result<()> {
    require_api_key(&app.config.embedding.api_key_env)?;
    require_api_key(&app.config.generation.api_key_env)?;
    let user_id = app.store.ensure_user(user).await?;

    if stream {
        use std::io::Write;

        let mut rx = app.engine.answer_stream(request, user_id)?;
        while let Some(event) = rx.recv().await {
            match event {
                RagEvent::Status { message } => eprintln!("{message}"),
                RagEvent::SearchComplete {
                    sources_found,
                    time_ms,
                } => eprintln!("found {sources_found} sources in {time_ms:.1}ms"),
                RagEvent::Sources { .. } => {}
                RagEvent::AnswerChunk { content } => {
                    print!("{content}");
                    std::io::stdout().flush()?;
                }
                RagEvent::Citations { citations } => {
                    println!();
                    for citation in &citations {
                        let page = citation
                            .page_number
                            .map(|p| format!(" (page {p})"))
                            .unwrap_or_default();
                        println!("[{}] {}{}", citation.number, citation.document_filename, page);
                    }
                }
                RagEvent::Done {
                    response_time_ms, ..
                } => eprintln!("done in {response_time_ms:.1}ms"),
                RagEvent::Error { message } => bail!("answer failed: {message}"),
            }
        }
        return Ok(());
    }

    let response = app.engine.answer(&request, user_id).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Text => {
            println!("{}\n", response.answer);
            for citation in &response.citations {
                let page = citation
                    .page_number
                    .map(|p| format!(" (page {p})"))
                    .unwrap_or_default();
                println!("[{}] {}{}", citation.number, citation.document_filename, page);
            }
            println!(
                "\nsearch {:.1}ms, generation {:.1}ms, total {:.1}ms",
                response.search_time_ms, response.generation_time_ms, response.response_time_ms
            );
        }
    }
    Ok(())
}

async fn cmd_status(app: &App, id: i64, format: OutputFormat) -> Result<()> {
    let doc = app
        .store
        .get_document(id)
        .await?
        .with_context(|| format!("no document with id {id}"))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&doc)?),
        OutputFormat::Text => {
            println!("document {}: {}", doc.id, doc.original_filename);
            println!("  owner: {}", doc.owner_id);
            println!("  status: {}", doc.status);
            println!("  mime: {}", doc.mime_type);
            println!("  size: {} bytes", doc.file_size);
            println!("  created: {}", doc.created_at);
            if let Some(processed) = doc.processed_at {
                println!("  processed: {processed}");
            }
            if let Some(error) = &doc.error_message {
                println!("  error: {error}");
            }
        }
    }
    Ok(())
}

async fn cmd_chunks(app: &App, id: i64, format: OutputFormat) -> Result<()> {
    let chunks = app.store.chunks_for_document(id).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&chunks)?),
        OutputFormat::Text => {
            if chunks.is_empty() {
                println!("No chunks.");
                return Ok(());
            }
            for chunk in &chunks {
                let page = chunk
                    .page_number
                    .map(|p| format!(" page {p}"))
                    .unwrap_or_default();
                let embedded = if chunk.has_embedding { "embedded" } else { "pending" };
                println!(
                    "#{}{} [{} tokens, {}]",
                    chunk.chunk_index, page, chunk.token_count, embedded
                );
                println!("   {}", preview_line(&chunk.content, 160));
            }
        }
    }
    Ok(())
}

async fn cmd_delete(app: &App, id: i64) -> Result<()> {
    let removed = docrag_worker::delete_document(&app.ingest, id).await?;
    println!("deleted document {id} ({removed} chunks)");
    Ok(())
}

async fn cmd_retry(app: &App, id: i64) -> Result<()> {
    require_api_key(&app.config.embedding.api_key_env)?;

    if !app.store.reset_for_retry(id).await? {
        bail!("document {id} is not in the failed state");
    }
    let doc = app
        .store
        .get_document(id)
        .await?
        .with_context(|| format!("no document with id {id}"))?;

    let pool = IngestWorkerPool::start(
        Arc::clone(&app.ingest),
        &WorkerConfig {
            pool_size: 1,
            queue_capacity: 4,
        },
    );
    pool.submit(IngestJob {
        document_id: doc.id,
        job_id: doc.job_id.clone(),
    })
    .await;
    pool.shutdown().await;

    cmd_status(app, id, OutputFormat::Text).await
}

async fn cmd_purge(app: &App, days: i64) -> Result<()> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
    let purged = docrag_worker::purge_stale_failed(&app.ingest, cutoff).await?;
    println!("purged {purged} failed documents older than {days} days");
    Ok(())
}

/// Guess a MIME type from the file extension.
fn guess_mime(path: &std::path::Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "txt" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tiff" | "tif" => "image/tiff",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/m4a",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        _ => return None,
    };
    Some(mime.to_string())
}

fn preview_line(content: &str, max: usize) -> String {
    let one_line = content.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = one_line.chars().take(max).collect();
    if truncated.len() < one_line.len() {
        format!("{truncated}...")
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime_known_extensions() {
        assert_eq!(
            guess_mime(std::path::Path::new("report.pdf")).as_deref(),
            Some("application/pdf")
        );
        assert_eq!(
            guess_mime(std::path::Path::new("notes.TXT")).as_deref(),
            Some("text/plain")
        );
        assert_eq!(
            guess_mime(std::path::Path::new("talk.mp3")).as_deref(),
            Some("audio/mpeg")
        );
        assert!(guess_mime(std::path::Path::new("archive.zip")).is_none());
        assert!(guess_mime(std::path::Path::new("no_extension")).is_none());
    }

    #[test]
    fn test_preview_line_flattens_and_truncates() {
        assert_eq!(preview_line("a\nb\tc", 100), "a b c");
        let long = "word ".repeat(100);
        assert!(preview_line(&long, 20).ends_with("..."));
    }
}
