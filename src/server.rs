//! HTTP surface of the chat service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;
use tracing::info;

use crate::completion::CompletionProvider;
use crate::error::ChatError;
use crate::prompt::{ChatTurn, Persona};
use crate::rate_limit::{identity_from_headers, now_ms, RateLimitStore};
use crate::relay;
use crate::retrieval::Retriever;

/// Shared handles for every request.
#[derive(Clone)]
pub struct AppState {
    /// Per-identity quota.
    pub rate_limiter: Arc<dyn RateLimitStore>,
    /// Question → context lookup.
    pub retriever: Arc<Retriever>,
    /// Completion backend selected at startup.
    pub completion: Arc<dyn CompletionProvider>,
    /// Assistant persona.
    pub persona: Arc<Persona>,
    /// Bound on each completion stream.
    pub completion_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    messages: Vec<ChatTurn>,
}

/// Routes: `GET /healthz`, `POST /api/chat`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
}

/// Binds `bind` and serves until ctrl-c.
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "chat service listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ChatError> {
    let identity = identity_from_headers(&headers);
    let admitted = state
        .rate_limiter
        .admit(&identity, now_ms())
        .await
        .map_err(|err| ChatError::internal("rate limiter unavailable", err))?;
    if !admitted {
        info!(%identity, "rate limit exceeded");
        return Err(ChatError::QuotaExceeded);
    }

    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|err| ChatError::BadRequest(format!("invalid request body: {err}")))?;
    let question = request
        .messages
        .last()
        .map(|turn| turn.content.as_str())
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ChatError::BadRequest("last message has no content".to_string()))?;

    let start = Instant::now();
    let context = state
        .retriever
        .retrieve(question)
        .await
        .map_err(|err| ChatError::upstream("context retrieval failed", err))?;
    info!(
        %identity,
        chunks = context.chunks.len(),
        path = ?context.path,
        retrieval_ms = start.elapsed().as_millis() as u64,
        "context selected"
    );

    let messages = state.persona.build_messages(&context.chunks, question);
    let body = relay::start(state.completion.as_ref(), &messages, state.completion_timeout)
        .await
        .map_err(|err| ChatError::upstream("completion service unavailable", err))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response())
}
