//! Streaming completion backends.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::prompt::ChatTurn;

pub mod gateway;
pub mod openai;

pub use gateway::GatewayCompletion;
pub use openai::{OpenAiCompletion, RelayMode};

/// Output of a completion backend.
pub enum CompletionStream {
    /// Already framed as SSE; relayed byte for byte.
    Sse(BoxStream<'static, Result<Bytes>>),
    /// Plain text deltas; the relay frames them and appends `[DONE]`.
    Deltas(BoxStream<'static, Result<String>>),
}

/// Produces a completion for a prepared conversation.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Starts a completion. Errors here mean nothing was produced.
    async fn stream_complete(&self, messages: &[ChatTurn]) -> Result<CompletionStream>;
}
