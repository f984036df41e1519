use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use folio::config::ServeCli;
use folio::prompt::Persona;
use folio::rate_limit::spawn_sweeper;
use folio::retrieval::Retriever;
use folio::server::{self, AppState};
use folio::telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = ServeCli::parse();

    let embedder = cli.embedder.build(cli.embedding_max_attempts)?;
    let handle = cli.store.open(None).await?;
    let store = handle.store();
    let rows = store.len().await?;
    if rows == 0 {
        tracing::warn!("vector store is empty; answers will carry no context until the indexer runs");
    }
    let retriever = Retriever::new(embedder, store, cli.top_k, cli.embedding_cache_size);
    retriever.verify_model().await?;

    let rate_limiter = cli.build_rate_limiter().await?;
    let sweeper = cli
        .sweep_interval()
        .map(|every| spawn_sweeper(Arc::clone(&rate_limiter), every));

    let persona = Persona::new(cli.resolve_subject()?);
    let completion = cli.build_completion()?;
    info!(
        rows,
        top_k = retriever.top_k(),
        subject = persona.subject(),
        completion = completion.name(),
        "chat service ready"
    );

    let state = AppState {
        rate_limiter,
        retriever: Arc::new(retriever),
        completion,
        persona: Arc::new(persona),
        completion_timeout: cli.completion_timeout(),
    };
    let result = server::serve(&cli.bind, state).await;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    result
}
