//! OpenAI-compatible `/chat/completions` streaming client.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::ValueEnum;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use url::Url;

use super::{CompletionProvider, CompletionStream};
use crate::prompt::ChatTurn;
use crate::sse::delta_stream;

/// How upstream bytes reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RelayMode {
    /// Forward upstream SSE bytes unchanged.
    Raw,
    /// Decode upstream frames and re-emit only text deltas.
    Reframe,
}

/// Streaming chat-completions client.
pub struct OpenAiCompletion {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    mode: RelayMode,
}

impl OpenAiCompletion {
    /// Builds a client. Only the connect phase is bounded here; the relay
    /// owns the overall deadline.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        temperature: f32,
        max_tokens: usize,
        mode: RelayMode,
        connect_timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing OpenAI chat model name");
        Url::parse(&base_url).with_context(|| format!("invalid OpenAI base URL {base_url}"))?;
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            temperature,
            max_tokens,
            mode,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletion {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_complete(&self, messages: &[ChatTurn]) -> Result<CompletionStream> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
            messages,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .context("failed to call OpenAI chat completions")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("OpenAI returned {}: {}", status, text);
        }
        let bytes = resp.bytes_stream();
        Ok(match self.mode {
            RelayMode::Raw => CompletionStream::Sse(bytes.map_err(anyhow::Error::from).boxed()),
            RelayMode::Reframe => CompletionStream::Deltas(delta_stream(bytes)),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
    messages: &'a [ChatTurn],
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use bytes::Bytes;
    use serde_json::Value;

    const UPSTREAM_SSE: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}],\"id\":\"x\"}\n\n\
                                data: [DONE]\n\n";

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    fn sse_router() -> Router {
        Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], true);
                assert_eq!(body["messages"][0]["role"], "system");
                ([("content-type", "text/event-stream")], UPSTREAM_SSE)
            }),
        )
    }

    fn completion(base_url: String, mode: RelayMode) -> OpenAiCompletion {
        OpenAiCompletion::new(
            "sk-test".into(),
            base_url,
            "gpt-4o-mini".into(),
            0.2,
            256,
            mode,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn messages() -> Vec<ChatTurn> {
        vec![ChatTurn::system("persona"), ChatTurn::user("question")]
    }

    #[tokio::test(flavor = "current_thread")]
    async fn raw_mode_passes_bytes_through() {
        let completion = completion(spawn_upstream(sse_router()).await, RelayMode::Raw);
        let CompletionStream::Sse(stream) = completion.stream_complete(&messages()).await.unwrap()
        else {
            panic!("expected raw SSE stream");
        };
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        let body: Vec<u8> = chunks.concat();
        assert_eq!(String::from_utf8(body).unwrap(), UPSTREAM_SSE);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reframe_mode_yields_text_deltas() {
        let completion = completion(spawn_upstream(sse_router()).await, RelayMode::Reframe);
        let CompletionStream::Deltas(stream) =
            completion.stream_complete(&messages()).await.unwrap()
        else {
            panic!("expected delta stream");
        };
        let deltas: Vec<String> = stream.try_collect().await.unwrap();
        assert_eq!(deltas, vec!["Hi".to_string()]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn non_success_status_is_an_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let completion = completion(spawn_upstream(router).await, RelayMode::Raw);
        let err = match completion.stream_complete(&messages()).await {
            Ok(_) => panic!("expected failure"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("500"), "{err}");
        assert!(err.to_string().contains("boom"), "{err}");
    }
}
