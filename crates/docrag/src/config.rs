//! Configuration handling for docrag.
//!
//! Loaded from a TOML file when present, otherwise defaults. Every knob the
//! pipeline honors is enumerated here; the composition root in `main.rs`
//! threads the values into component constructors.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub search: SearchTuning,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub extract: ExtractConfig,

    #[serde(default)]
    pub worker: WorkerTuning,
}

/// Data directory layout.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Root data directory; defaults to the platform data dir
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        if let Ok(dir) = std::env::var("DOCRAG_DATA_DIR") {
            return PathBuf::from(dir);
        }
        ProjectDirs::from("", "", "docrag")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./docrag-data"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolved_data_dir().join("docrag.db")
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.resolved_data_dir().join("indexes")
    }

    /// Owner-isolated upload directory for a user.
    pub fn uploads_dir(&self, user_id: i64) -> PathBuf {
        self.resolved_data_dir().join("uploads").join(user_id.to_string())
    }
}

/// Chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_min_chunk_size() -> usize {
    100
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dim")]
    pub dimension: usize,

    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dim() -> usize {
    1536
}

fn default_embedding_batch_size() -> usize {
    100
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dim(),
            batch_size: default_embedding_batch_size(),
            base_url: default_openai_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index scope name (file stem under the indexes directory)
    #[serde(default = "default_index_scope")]
    pub scope: String,

    #[serde(default = "default_compaction_ratio")]
    pub compaction_tombstone_ratio: f64,
}

fn default_index_scope() -> String {
    "main".to_string()
}

fn default_compaction_ratio() -> f64 {
    0.2
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            scope: default_index_scope(),
            compaction_tombstone_ratio: default_compaction_ratio(),
        }
    }
}

/// Search tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTuning {
    #[serde(default = "default_topk")]
    pub topk_default: usize,

    #[serde(default = "default_branch_multiplier")]
    pub branch_multiplier: usize,

    #[serde(default = "default_branch_cap")]
    pub branch_cap: usize,

    #[serde(default = "default_rrf_constant")]
    pub rrf_constant: u32,

    #[serde(default = "default_query_cache_ttl")]
    pub query_cache_ttl_secs: u64,

    #[serde(default = "default_embedding_cache_ttl")]
    pub embedding_cache_ttl_secs: u64,
}

fn default_topk() -> usize {
    5
}

fn default_branch_multiplier() -> usize {
    4
}

fn default_branch_cap() -> usize {
    100
}

fn default_rrf_constant() -> u32 {
    60
}

fn default_query_cache_ttl() -> u64 {
    3600
}

fn default_embedding_cache_ttl() -> u64 {
    86_400
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            topk_default: default_topk(),
            branch_multiplier: default_branch_multiplier(),
            branch_cap: default_branch_cap(),
            rrf_constant: default_rrf_constant(),
            query_cache_ttl_secs: default_query_cache_ttl(),
            embedding_cache_ttl_secs: default_embedding_cache_ttl(),
        }
    }
}

impl SearchTuning {
    pub fn to_search_config(&self) -> docrag_search::SearchConfig {
        docrag_search::SearchConfig {
            topk_default: self.topk_default,
            branch_multiplier: self.branch_multiplier,
            branch_cap: self.branch_cap,
            rrf_constant: self.rrf_constant,
            query_cache_ttl: Duration::from_secs(self.query_cache_ttl_secs),
            embedding_cache_ttl: Duration::from_secs(self.embedding_cache_ttl_secs),
        }
    }
}

/// Generation provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_generation_timeout_secs() -> u64 {
    60
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            base_url: default_openai_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

/// Extractor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "default_extractor_timeout_secs")]
    pub timeout_secs: u64,

    /// Path to the tesseract binary for image OCR
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: String,

    /// Transcription model for audio uploads
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
}

fn default_extractor_timeout_secs() -> u64 {
    120
}

fn default_tesseract_path() -> String {
    "tesseract".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_extractor_timeout_secs(),
            tesseract_path: default_tesseract_path(),
            transcription_model: default_transcription_model(),
        }
    }
}

/// Worker pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTuning {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_pool_size() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for WorkerTuning {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Config {
    /// Load from a TOML file, or defaults when the file does not exist.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match ProjectDirs::from("", "", "docrag") {
                Some(dirs) => dirs.config_dir().join("config.toml"),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.chunking.chunk_size, 512);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.chunking.min_chunk_size, 100);
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.search.rrf_constant, 60);
        assert_eq!(config.search.branch_multiplier, 4);
        assert_eq!(config.search.branch_cap, 100);
        assert_eq!(config.search.query_cache_ttl_secs, 3600);
        assert_eq!(config.search.embedding_cache_ttl_secs, 86_400);
        assert_eq!(config.index.compaction_tombstone_ratio, 0.2);
        assert_eq!(config.generation.model, "gpt-4o-mini");
        assert_eq!(config.generation.temperature, 0.3);
        assert_eq!(config.generation.max_tokens, 1000);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            chunk_size = 256

            [search]
            rrf_constant = 90
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 256);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.search.rrf_constant, 90);
        assert_eq!(config.search.branch_cap, 100);
    }

    #[test]
    fn test_uploads_dir_is_owner_isolated() {
        let storage = StorageConfig {
            data_dir: Some(PathBuf::from("/data")),
        };
        assert_eq!(storage.uploads_dir(7), PathBuf::from("/data/uploads/7"));
        assert_ne!(storage.uploads_dir(7), storage.uploads_dir(8));
    }
}
