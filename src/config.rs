//! Command-line and environment configuration for both binaries.
//!
//! Embedder and store arguments are shared so the indexer and the service
//! resolve the same model and the same store from the same variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, ValueEnum};

use crate::completion::{CompletionProvider, GatewayCompletion, OpenAiCompletion, RelayMode};
use crate::content::PortfolioContent;
use crate::embedder::{EmbeddingProvider, HashedEmbedder, OpenAiEmbedder};
use crate::indexer::{new_generation, IndexPlan};
use crate::pg::{self, TableName};
use crate::rate_limit::{
    MemoryRateLimiter, PostgresRateLimiter, RateLimitPolicy, RateLimitStore,
};
use crate::relay::DEFAULT_COMPLETION_TIMEOUT;
use crate::vector_store::{MemoryStore, PgVectorStore, VectorStore};

/// Upper bound for the completion deadline (one day).
const MAX_COMPLETION_TIMEOUT_SECS: u64 = 86_400;

/// Upper bound for the rate-limit window (thirty days).
const MAX_RATE_LIMIT_WINDOW_SECS: u64 = 30 * 86_400;

/// Embedding backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbedderKind {
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
    /// Local feature hashing.
    Hashed,
}

/// Vector store backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StoreKind {
    /// In-process store loaded from a JSONL snapshot.
    Memory,
    /// Postgres table with the pgvector extension.
    Pgvector,
}

/// Completion backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionKind {
    /// OpenAI-compatible streaming chat completions.
    Openai,
    /// Agent gateway session endpoint.
    Gateway,
}

/// Where rate-limit counters live.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RateLimitBackend {
    /// Per-process LRU table.
    Memory,
    /// Shared Postgres table.
    Postgres,
}

/// Embedding settings shared by the indexer and the service.
#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    /// Embedding backend.
    #[arg(long, env = "FOLIO_EMBEDDER", value_enum, default_value = "openai")]
    pub embedder: EmbedderKind,

    /// OpenAI API key (also used by the OpenAI completion backend).
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(
        long,
        env = "FOLIO_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub openai_base_url: String,

    /// Embedding model identifier.
    #[arg(
        long,
        env = "FOLIO_EMBEDDING_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub embedding_model: String,

    /// Optional embedding dimension override.
    #[arg(long, env = "FOLIO_EMBEDDING_DIMENSIONS")]
    pub embedding_dimensions: Option<usize>,

    /// Vector width of the hashed embedder.
    #[arg(long, env = "FOLIO_HASHED_DIMENSIONS", default_value_t = 256)]
    pub hashed_dimensions: usize,

    /// Max inputs per embedding request.
    #[arg(long, env = "FOLIO_EMBEDDING_BATCH", default_value_t = 32)]
    pub embedding_batch: usize,

    /// Seconds before an embedding request times out.
    #[arg(long, env = "FOLIO_EMBEDDING_TIMEOUT_SECS", default_value_t = 30)]
    pub embedding_timeout_secs: u64,
}

impl EmbedderArgs {
    /// Builds the configured provider; `max_attempts` counts the first try.
    pub fn build(&self, max_attempts: usize) -> Result<Arc<dyn EmbeddingProvider>> {
        Ok(match self.embedder {
            EmbedderKind::Hashed => Arc::new(HashedEmbedder::new(self.hashed_dimensions)),
            EmbedderKind::Openai => Arc::new(OpenAiEmbedder::new(
                self.require_api_key()?,
                self.openai_base_url.clone(),
                self.embedding_model.clone(),
                self.embedding_dimensions,
                Duration::from_secs(self.embedding_timeout_secs.max(1)),
                max_attempts.max(1),
                self.embedding_batch.max(1),
            )?),
        })
    }

    fn require_api_key(&self) -> Result<String> {
        self.openai_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is required for OpenAI backends"))
    }
}

/// Vector store settings shared by the indexer and the service.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Vector store backend.
    #[arg(long, env = "FOLIO_STORE", value_enum, default_value = "memory")]
    pub store: StoreKind,

    /// JSONL snapshot used by the memory store.
    #[arg(long, env = "FOLIO_SNAPSHOT", default_value = "data/chunks.jsonl")]
    pub snapshot: PathBuf,

    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Schema for Postgres tables.
    #[arg(long, env = "FOLIO_SCHEMA", default_value = "public")]
    pub schema: String,

    /// Table storing embedded chunks.
    #[arg(long, env = "FOLIO_TABLE", default_value = "portfolio_chunks")]
    pub table: String,
}

/// Opened vector store plus what is needed to persist it.
pub enum StoreHandle {
    /// Memory store and its snapshot path.
    Memory {
        /// Live store.
        store: Arc<MemoryStore>,
        /// Snapshot written by [`StoreHandle::persist`].
        snapshot: PathBuf,
    },
    /// Postgres-backed store.
    Pgvector(Arc<PgVectorStore>),
}

impl StoreHandle {
    /// Trait object for retrieval and indexing.
    pub fn store(&self) -> Arc<dyn VectorStore> {
        match self {
            StoreHandle::Memory { store, .. } => store.clone(),
            StoreHandle::Pgvector(store) => store.clone(),
        }
    }

    /// Writes the memory snapshot; Postgres rows are already durable.
    pub async fn persist(&self) -> Result<usize> {
        match self {
            StoreHandle::Memory { store, snapshot } => {
                if let Some(parent) = snapshot.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {:?}", parent))?;
                }
                store.save_jsonl(snapshot).await
            }
            StoreHandle::Pgvector(store) => store.len().await,
        }
    }
}

impl StoreArgs {
    /// Opens the configured store. `dims` creates the pgvector schema when set.
    pub async fn open(&self, dims: Option<usize>) -> Result<StoreHandle> {
        match self.store {
            StoreKind::Memory => Ok(StoreHandle::Memory {
                store: Arc::new(MemoryStore::open_or_empty(&self.snapshot)?),
                snapshot: self.snapshot.clone(),
            }),
            StoreKind::Pgvector => {
                let client = pg::connect(self.require_database_url()?).await?;
                let store = PgVectorStore::new(
                    Arc::new(client),
                    TableName::new(self.schema.clone(), self.table.clone())?,
                );
                if let Some(dims) = dims {
                    store.prepare(dims).await?;
                }
                Ok(StoreHandle::Pgvector(Arc::new(store)))
            }
        }
    }

    fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow!("DATABASE_URL is required for Postgres backends"))
    }
}

/// `chat_api` command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "chat_api", about = "Portfolio chat service with retrieval and streaming replies")]
pub struct ServeCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "FOLIO_BIND", default_value = "127.0.0.1:3000")]
    pub bind: String,

    /// Embedding settings.
    #[command(flatten)]
    pub embedder: EmbedderArgs,

    /// Vector store settings.
    #[command(flatten)]
    pub store: StoreArgs,

    /// Content records; the site owner's name becomes the persona subject.
    #[arg(long, env = "FOLIO_CONTENT", default_value = "data/portfolio.json")]
    pub content: PathBuf,

    /// Persona subject, overriding the name in the content records.
    #[arg(long, env = "FOLIO_SUBJECT")]
    pub subject: Option<String>,

    /// Chunks placed in each prompt.
    #[arg(long, env = "FOLIO_TOP_K", default_value_t = 5)]
    pub top_k: usize,

    /// Max cached query embeddings (0 disables caching).
    #[arg(long, env = "FOLIO_EMBEDDING_CACHE", default_value_t = 1024)]
    pub embedding_cache_size: usize,

    /// Attempts per query embedding, counting the first.
    #[arg(long, env = "FOLIO_EMBEDDING_MAX_ATTEMPTS", default_value_t = 1)]
    pub embedding_max_attempts: usize,

    /// Completion backend.
    #[arg(long, env = "FOLIO_COMPLETION", value_enum, default_value = "openai")]
    pub completion: CompletionKind,

    /// Chat model for the OpenAI backend.
    #[arg(long, env = "FOLIO_CHAT_MODEL", default_value = "gpt-4o-mini")]
    pub chat_model: String,

    /// Sampling temperature.
    #[arg(long, env = "FOLIO_TEMPERATURE", default_value_t = 0.3)]
    pub temperature: f32,

    /// Max tokens per reply.
    #[arg(long, env = "FOLIO_MAX_TOKENS", default_value_t = 512)]
    pub max_tokens: usize,

    /// Relay upstream bytes as-is or re-frame text deltas.
    #[arg(long, env = "FOLIO_RELAY_MODE", value_enum, default_value = "raw")]
    pub relay_mode: RelayMode,

    /// Seconds a completion may stream before it is cut off.
    #[arg(
        long,
        env = "FOLIO_COMPLETION_TIMEOUT_SECS",
        default_value_t = DEFAULT_COMPLETION_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..=MAX_COMPLETION_TIMEOUT_SECS)
    )]
    pub completion_timeout_secs: u64,

    /// Seconds allowed to open the completion connection.
    #[arg(long, env = "FOLIO_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Agent gateway base URL.
    #[arg(long, env = "FOLIO_GATEWAY_URL")]
    pub gateway_url: Option<String>,

    /// Agent gateway session key.
    #[arg(long, env = "FOLIO_GATEWAY_SESSION_KEY")]
    pub gateway_session_key: Option<String>,

    /// Rate-limit counter backend.
    #[arg(long, env = "FOLIO_RATE_LIMIT_STORE", value_enum, default_value = "memory")]
    pub rate_limit_store: RateLimitBackend,

    /// Requests admitted per identity per window.
    #[arg(long, env = "FOLIO_RATE_LIMIT", default_value_t = 10)]
    pub rate_limit: u32,

    /// Window length in seconds.
    #[arg(
        long,
        env = "FOLIO_RATE_LIMIT_WINDOW_SECS",
        default_value_t = 3600,
        value_parser = clap::value_parser!(u64).range(1..=MAX_RATE_LIMIT_WINDOW_SECS)
    )]
    pub rate_limit_window_secs: u64,

    /// Identities tracked by the memory limiter.
    #[arg(long, env = "FOLIO_RATE_LIMIT_CAPACITY", default_value_t = 10_000)]
    pub rate_limit_capacity: usize,

    /// Seconds between sweeps of expired counters (0 disables).
    #[arg(long, env = "FOLIO_RATE_LIMIT_SWEEP_SECS", default_value_t = 300)]
    pub rate_limit_sweep_secs: u64,

    /// Table holding shared rate-limit counters.
    #[arg(long, env = "FOLIO_RATE_LIMIT_TABLE", default_value = "chat_rate_limits")]
    pub rate_limit_table: String,
}

impl ServeCli {
    /// Quota derived from the flags.
    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            limit: self.rate_limit.max(1),
            window_ms: self.rate_limit_window_secs.max(1).saturating_mul(1000),
        }
    }

    /// Total completion deadline.
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs.max(1))
    }

    /// Sweep period, `None` when disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.rate_limit_sweep_secs > 0).then(|| Duration::from_secs(self.rate_limit_sweep_secs))
    }

    /// Persona subject from the flag or the content records.
    pub fn resolve_subject(&self) -> Result<String> {
        match &self.subject {
            Some(subject) => Ok(subject.clone()),
            None => load_subject(&self.content),
        }
    }

    /// Builds the completion backend.
    pub fn build_completion(&self) -> Result<Arc<dyn CompletionProvider>> {
        Ok(match self.completion {
            CompletionKind::Openai => Arc::new(OpenAiCompletion::new(
                self.embedder.require_api_key()?,
                self.embedder.openai_base_url.clone(),
                self.chat_model.clone(),
                self.temperature,
                self.max_tokens.max(1),
                self.relay_mode,
                Duration::from_secs(self.connect_timeout_secs.max(1)),
            )?),
            CompletionKind::Gateway => Arc::new(GatewayCompletion::new(
                self.gateway_url
                    .clone()
                    .ok_or_else(|| anyhow!("FOLIO_GATEWAY_URL is required for the gateway backend"))?,
                self.gateway_session_key
                    .clone()
                    .ok_or_else(|| anyhow!("FOLIO_GATEWAY_SESSION_KEY is required for the gateway backend"))?,
                self.completion_timeout(),
            )?),
        })
    }

    /// Builds the rate-limit store, creating the shared table when needed.
    pub async fn build_rate_limiter(&self) -> Result<Arc<dyn RateLimitStore>> {
        let policy = self.rate_limit_policy();
        Ok(match self.rate_limit_store {
            RateLimitBackend::Memory => {
                Arc::new(MemoryRateLimiter::new(policy, self.rate_limit_capacity))
            }
            RateLimitBackend::Postgres => {
                let client = pg::connect(self.store.require_database_url()?).await?;
                let limiter = PostgresRateLimiter::new(
                    Arc::new(client),
                    TableName::new(self.store.schema.clone(), self.rate_limit_table.clone())?,
                    policy,
                );
                limiter.prepare().await?;
                Arc::new(limiter)
            }
        })
    }
}

/// `indexer` command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "indexer", about = "Embeds portfolio content into the chat vector store")]
pub struct IndexCli {
    /// Embedding settings.
    #[command(flatten)]
    pub embedder: EmbedderArgs,

    /// Vector store settings.
    #[command(flatten)]
    pub store: StoreArgs,

    /// Content records (JSON).
    #[arg(long, env = "FOLIO_CONTENT", default_value = "data/portfolio.json")]
    pub content: PathBuf,

    /// Free-text narrative.
    #[arg(long, env = "FOLIO_ABOUT", default_value = "data/about.md")]
    pub about: PathBuf,

    /// Character ceiling per chunk.
    #[arg(long, default_value_t = 1500)]
    pub chunk_chars: usize,

    /// Generation tag (defaults to a timestamp).
    #[arg(long)]
    pub generation: Option<String>,

    /// Keep rows from earlier runs.
    #[arg(long, default_value_t = false)]
    pub keep_stale: bool,

    /// Embedding batches in flight at once.
    #[arg(long, default_value_t = 2)]
    pub concurrency: usize,

    /// Attempts per embedding batch, counting the first.
    #[arg(long, env = "FOLIO_EMBEDDING_MAX_ATTEMPTS", default_value_t = 5)]
    pub embedding_max_attempts: usize,
}

impl IndexCli {
    /// Run parameters from the flags.
    pub fn plan(&self) -> IndexPlan {
        IndexPlan {
            chunk_chars: self.chunk_chars.max(1),
            generation: self.generation.clone().unwrap_or_else(new_generation),
            prune_stale: !self.keep_stale,
            concurrency: self.concurrency.max(1),
        }
    }
}

fn load_subject(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read content records {:?}", path))?;
    let content: PortfolioContent = serde_json::from_str(&raw)
        .with_context(|| format!("invalid content records in {:?}", path))?;
    anyhow::ensure!(
        !content.site.name.trim().is_empty(),
        "content records have no site name; pass --subject"
    );
    Ok(content.site.name)
}
