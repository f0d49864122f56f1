//! Startup configuration
//!
//! All configuration is environment-driven and parsed exactly once at
//! startup; components receive an immutable `Arc<Config>` and never read
//! the environment themselves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use versecut_common::{Error, Result};

/// Audio acquisition and slicing settings
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Maximum |expected - actual| duration drift in seconds
    pub duration_tolerance: f64,
    /// Minimum candidate score to accept a search result
    pub match_threshold: f64,
    /// Candidates requested per search query
    pub search_results: usize,
    /// ffmpeg audio codec for snippets
    pub codec: String,
    /// ffmpeg audio bitrate for snippets
    pub bitrate: String,
    /// Snippet container extension (no dot)
    pub snippet_format: String,
}

/// One LLM provider in priority order
#[derive(Debug, Clone)]
pub struct LlmProvider {
    /// Provider name used in logs and events ("groq", "together")
    pub name: String,
    /// Chat-completions endpoint base, e.g. `https://api.groq.com/openai/v1`
    pub base_url: String,
    /// Model identifier sent with each request
    pub model: String,
    /// API key; a provider without one is skipped without consuming retries
    pub api_key: Option<String>,
}

/// LLM segmentation settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Providers tried in order
    pub providers: Vec<LlmProvider>,
    /// Tracks per batched segmentation call
    pub batch_size: usize,
    /// Whether Phase 1 batch segmentation runs at all
    pub enable_batch: bool,
    /// Attempts per provider for retryable errors
    pub max_retries: u32,
    /// Base delay for linear backoff between attempts
    pub retry_delay: Duration,
}

/// Embedding model settings
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Model identifier (see `embedder::FastEmbedder` for resolution)
    pub model_id: String,
    /// Output dimension after truncation and renormalization
    pub dimension: usize,
}

/// Vector index connection settings
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    /// Local host, used when no URL + API key pair is configured
    pub host: String,
    /// Local REST port
    pub port: u16,
    /// Remote URL (takes effect together with `api_key`)
    pub url: Option<String>,
    /// Remote API key
    pub api_key: Option<String>,
    /// Collection name
    pub collection: String,
}

impl VectorIndexConfig {
    /// Remote URL mode when a credential is present, else local host/port
    pub fn base_url(&self) -> String {
        if let (Some(url), Some(_)) = (&self.url, &self.api_key) {
            url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// S3-compatible blob store settings
#[derive(Debug, Clone, Default)]
pub struct BlobConfig {
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: Option<String>,
    /// Custom public domain for snippet URLs
    pub public_domain: Option<String>,
}

impl BlobConfig {
    /// True only when endpoint, both keys, and bucket are all set
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
            && self.access_key_id.is_some()
            && self.secret_access_key.is_some()
            && self.bucket.is_some()
    }
}

/// Process-wide configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the curated store and the ledger
    pub data_dir: PathBuf,
    /// Directory holding downloaded audio, snippets, and logs
    pub output_dir: PathBuf,
    /// Optional LRCLib database dump (reserved source)
    pub lrclib_db_path: Option<PathBuf>,
    /// HTTP bind host
    pub http_host: String,
    /// HTTP bind port
    pub http_port: u16,
    pub audio: AudioConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub vector_index: VectorIndexConfig,
    pub blob: BlobConfig,
}

const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
const DEFAULT_TOGETHER_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct-Turbo";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_opt(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{key} has invalid value {raw:?}"))),
        None => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref() {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

impl Config {
    /// Build configuration from the process environment
    pub fn from_env() -> Result<Self> {
        let data_dir = PathBuf::from(env_or("DATA_DIR", "data"));
        let output_dir = PathBuf::from(env_or("OUTPUT_DIR", "output"));

        let providers = Self::providers_from_env();

        Ok(Self {
            data_dir,
            output_dir,
            lrclib_db_path: env_opt("LRCLIB_DB_PATH").map(PathBuf::from),
            http_host: env_or("HOST", "127.0.0.1"),
            http_port: env_parse("PORT", 8000u16)?,
            audio: AudioConfig {
                duration_tolerance: env_parse("DURATION_TOLERANCE", 2.0)?,
                match_threshold: env_parse("MATCH_THRESHOLD", 50.0)?,
                search_results: env_parse("SEARCH_RESULTS", 5usize)?,
                codec: "libopus".to_string(),
                bitrate: "96k".to_string(),
                snippet_format: "opus".to_string(),
            },
            llm: LlmConfig {
                providers,
                batch_size: env_parse("BATCH_SIZE_LLM", 10usize)?,
                enable_batch: env_bool("ENABLE_BATCH_SEGMENTATION", true),
                max_retries: env_parse("MAX_RETRIES", 3u32)?,
                retry_delay: Duration::from_secs_f64(env_parse("RETRY_DELAY", 1.0)?),
            },
            embedding: EmbeddingConfig {
                model_id: env_or("EMBEDDING_MODEL", "BAAI/bge-m3"),
                dimension: 768,
            },
            vector_index: VectorIndexConfig {
                host: env_or("QDRANT_HOST", "localhost"),
                port: env_parse("QDRANT_PORT", 6333u16)?,
                url: env_opt("QDRANT_URL"),
                api_key: env_opt("QDRANT_API_KEY"),
                collection: env_or("QDRANT_COLLECTION", "snippets"),
            },
            blob: BlobConfig {
                endpoint: env_opt("R2_ENDPOINT"),
                access_key_id: env_opt("R2_ACCESS_KEY_ID"),
                secret_access_key: env_opt("R2_SECRET_ACCESS_KEY"),
                bucket: env_opt("R2_BUCKET_NAME"),
                public_domain: env_opt("R2_PUBLIC_DOMAIN"),
            },
        })
    }

    fn providers_from_env() -> Vec<LlmProvider> {
        let names = env_or("LLM_PROVIDERS", "groq");
        names
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .filter_map(|name| match name.as_str() {
                "groq" => Some(LlmProvider {
                    name,
                    base_url: "https://api.groq.com/openai/v1".to_string(),
                    model: env_or("LLM_MODEL_GROQ", DEFAULT_GROQ_MODEL),
                    api_key: env_opt("GROQ_API_KEY"),
                }),
                "together" => Some(LlmProvider {
                    name,
                    base_url: "https://api.together.xyz/v1".to_string(),
                    model: env_or("LLM_MODEL_TOGETHER", DEFAULT_TOGETHER_MODEL),
                    api_key: env_opt("TOGETHER_API_KEY"),
                }),
                other => {
                    tracing::warn!(provider = %other, "Unknown LLM provider, ignoring");
                    None
                }
            })
            .collect()
    }

    /// Downloaded full-track audio
    pub fn audio_dir(&self) -> PathBuf {
        self.output_dir.join("audio")
    }

    /// Sliced snippet files awaiting upload
    pub fn snippets_dir(&self) -> PathBuf {
        self.output_dir.join("snippets")
    }

    /// Durable per-run logs (skipped songs, dry-run reports)
    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    /// Curated track store database file
    pub fn curated_db_path(&self) -> PathBuf {
        self.data_dir.join("curated_tracks.sqlite")
    }

    /// Processed-tracks ledger database file
    pub fn ledger_db_path(&self) -> PathBuf {
        self.data_dir.join("pipeline_status.sqlite")
    }

    /// Create the working directories if missing
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.data_dir.as_path(),
            &self.audio_dir(),
            &self.snippets_dir(),
            &self.logs_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Test fixture: everything rooted under one scratch directory
    pub fn for_tests(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            output_dir: root.join("output"),
            lrclib_db_path: None,
            http_host: "127.0.0.1".to_string(),
            http_port: 0,
            audio: AudioConfig {
                duration_tolerance: 2.0,
                match_threshold: 50.0,
                search_results: 5,
                codec: "libopus".to_string(),
                bitrate: "96k".to_string(),
                snippet_format: "opus".to_string(),
            },
            llm: LlmConfig {
                providers: Vec::new(),
                batch_size: 10,
                enable_batch: true,
                max_retries: 3,
                retry_delay: Duration::from_millis(1),
            },
            embedding: EmbeddingConfig {
                model_id: "BAAI/bge-m3".to_string(),
                dimension: 768,
            },
            vector_index: VectorIndexConfig {
                host: "localhost".to_string(),
                port: 6333,
                url: None,
                api_key: None,
                collection: "snippets".to_string(),
            },
            blob: BlobConfig::default(),
        }
    }
}
