use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use folio::completion::{CompletionProvider, CompletionStream, OpenAiCompletion, RelayMode};
use folio::content::SourceTag;
use folio::embedder::{EmbeddingProvider, HashedEmbedder, OpenAiEmbedder};
use folio::embeddings::ContentChunk;
use folio::prompt::{ChatTurn, Persona, Role};
use folio::rate_limit::{MemoryRateLimiter, RateLimitPolicy};
use folio::retrieval::Retriever;
use folio::server::{router, AppState};
use folio::vector_store::MemoryStore;
use futures_util::stream::{self, StreamExt};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use tower::ServiceExt;

/// Streams the user turn back in two deltas.
struct EchoCompletion;

#[async_trait]
impl CompletionProvider for EchoCompletion {
    fn name(&self) -> &str {
        "echo"
    }

    async fn stream_complete(&self, messages: &[ChatTurn]) -> Result<CompletionStream> {
        let user = messages
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.clone())
            .unwrap_or_default();
        let deltas = vec![Ok("You asked: ".to_string()), Ok(user)];
        Ok(CompletionStream::Deltas(stream::iter(deltas).boxed()))
    }
}

fn seeded_store(embedder: &HashedEmbedder) -> MemoryStore {
    let texts = [
        (SourceTag::Skills, "Python, TypeScript, Docker, Linux administration"),
        (
            SourceTag::Experience,
            "Builds AI voice assistants at Confido Health that answer patient calls",
        ),
        (SourceTag::Social, "GitHub and LinkedIn profiles"),
    ];
    let chunks = texts
        .iter()
        .enumerate()
        .map(|(idx, (source, text))| {
            ContentChunk::new(
                text.to_string(),
                *source,
                idx,
                embedder.embed_text(text),
                embedder.model_id(),
                "g1",
            )
        })
        .collect();
    MemoryStore::with_chunks(chunks).unwrap()
}

fn app_with(
    embedder: Arc<dyn EmbeddingProvider>,
    store: MemoryStore,
    completion: Arc<dyn CompletionProvider>,
    top_k: usize,
) -> Router {
    let state = AppState {
        rate_limiter: Arc::new(MemoryRateLimiter::new(RateLimitPolicy::default(), 100)),
        retriever: Arc::new(Retriever::new(embedder, Arc::new(store), top_k, 16)),
        completion,
        persona: Arc::new(Persona::new("Nihar Shah")),
        completion_timeout: Duration::from_secs(10),
    };
    router(state)
}

fn default_app() -> Router {
    let embedder = HashedEmbedder::default();
    let store = seeded_store(&embedder);
    app_with(Arc::new(embedder), store, Arc::new(EchoCompletion), 1)
}

fn chat_request(ip: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(body))
        .unwrap()
}

fn question(text: &str) -> String {
    json!({ "messages": [
        { "role": "assistant", "content": "Hi! Ask me anything." },
        { "role": "user", "content": text }
    ] })
    .to_string()
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/v1")
}

fn failing_upstream() -> Router {
    Router::new()
        .route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") }),
        )
        .route(
            "/v1/embeddings",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") }),
        )
}

#[tokio::test(flavor = "current_thread")]
async fn streams_answer_grounded_in_matching_chunk() {
    let response = default_app()
        .oneshot(chat_request("198.51.100.1", question("Does Nihar build voice assistants?")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
    assert_eq!(headers[header::CONNECTION], "keep-alive");

    let body = body_text(response).await;
    let frames: Vec<&str> = body.split_terminator("\n\n").collect();
    assert_eq!(frames.len(), 3, "{body}");
    assert_eq!(
        frames[0],
        "data: {\"choices\":[{\"delta\":{\"content\":\"You asked: \"}}]}"
    );
    assert!(frames[1].contains("Builds AI voice assistants at Confido Health"));
    assert!(frames[1].contains("Question: Does Nihar build voice assistants?"));
    assert!(!frames[1].contains("Docker"));
    assert_eq!(frames[2], "data: [DONE]");
}

#[tokio::test(flavor = "current_thread")]
async fn vague_question_still_reaches_voice_assistant_context() {
    let embedder = HashedEmbedder::default();
    let store = seeded_store(&embedder);
    let app = app_with(Arc::new(embedder), store, Arc::new(EchoCompletion), 5);
    let body = json!({ "messages": [{ "role": "user", "content": "What does he do?" }] });
    let response = app
        .oneshot(chat_request("198.51.100.2", body.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    assert!(body.ends_with("data: [DONE]\n\n"));
    let text: String = body
        .split_terminator("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .filter(|payload| *payload != "[DONE]")
        .map(|payload| {
            let frame: serde_json::Value = serde_json::from_str(payload).unwrap();
            frame["choices"][0]["delta"]["content"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert!(text.to_lowercase().contains("voice"), "{text}");
}

#[tokio::test(flavor = "current_thread")]
async fn eleventh_request_from_one_address_is_rejected() {
    let app = default_app();
    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(chat_request("203.0.113.9", question("skills?")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(chat_request("203.0.113.9, 10.0.0.1", question("skills?")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_text(response).await, "Rate limit exceeded");

    let other = app
        .oneshot(chat_request("203.0.113.10", question("skills?")))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_body_is_bad_request() {
    let app = default_app();
    let response = app
        .clone()
        .oneshot(chat_request("192.0.2.1", "{\"messages\": [".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(chat_request(
            "192.0.2.1",
            json!({ "messages": [{ "role": "user", "content": "   " }] }).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_requests_still_consume_quota() {
    let app = default_app();
    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(chat_request("192.0.2.7", "not json".to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let response = app
        .oneshot(chat_request("192.0.2.7", question("skills?")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_text(response).await, "Rate limit exceeded");
}

#[tokio::test(flavor = "current_thread")]
async fn completion_upstream_failure_is_bad_gateway() {
    let base_url = spawn_upstream(failing_upstream()).await;
    let completion = OpenAiCompletion::new(
        "sk-test".into(),
        base_url,
        "gpt-4o-mini".into(),
        0.2,
        128,
        RelayMode::Raw,
        Duration::from_secs(5),
    )
    .unwrap();
    let embedder = HashedEmbedder::default();
    let store = seeded_store(&embedder);
    let app = app_with(Arc::new(embedder), store, Arc::new(completion), 1);

    let response = app
        .oneshot(chat_request("192.0.2.2", question("projects?")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let body = body_text(response).await;
    assert_eq!(body, "completion service unavailable");
}

#[tokio::test(flavor = "current_thread")]
async fn embedding_failure_is_bad_gateway() {
    let base_url = spawn_upstream(failing_upstream()).await;
    let embedder = OpenAiEmbedder::new(
        "sk-test".into(),
        base_url,
        "text-embedding-3-small".into(),
        None,
        Duration::from_secs(5),
        1,
        8,
    )
    .unwrap();
    let app = app_with(Arc::new(embedder), MemoryStore::new(), Arc::new(EchoCompletion), 1);

    let response = app
        .oneshot(chat_request("192.0.2.3", question("projects?")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test(flavor = "current_thread")]
async fn empty_store_still_answers() {
    let app = app_with(
        Arc::new(HashedEmbedder::default()),
        MemoryStore::new(),
        Arc::new(EchoCompletion),
        5,
    );
    let response = app
        .oneshot(chat_request("192.0.2.4", question("anything?")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Context:\\n\\n\\nQuestion: anything?"), "{body}");
    assert!(body.ends_with("data: [DONE]\n\n"));
}

#[tokio::test(flavor = "current_thread")]
async fn healthz_is_ok() {
    let response = default_app()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
