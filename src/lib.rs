#![warn(missing_docs)]
//! Core library for the portfolio chat service and its offline indexer.

pub mod chunker;
pub mod completion;
pub mod config;
pub mod content;
pub mod embedder;
pub mod embeddings;
pub mod error;
pub mod indexer;
pub mod pg;
pub mod prompt;
pub mod rate_limit;
pub mod relay;
pub mod retrieval;
pub mod server;
pub mod sse;
pub mod telemetry;
pub mod vector_store;

pub use completion::{CompletionProvider, CompletionStream};
pub use content::{Corpus, SourceTag};
pub use embedder::EmbeddingProvider;
pub use embeddings::{ContentChunk, RetrievedChunk};
pub use error::ChatError;
pub use pg::TableName;
pub use prompt::{ChatTurn, Persona, Role};
pub use rate_limit::RateLimitStore;
pub use retrieval::Retriever;
pub use server::{router, AppState};
pub use vector_store::VectorStore;
