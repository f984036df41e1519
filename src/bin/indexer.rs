use anyhow::{Context, Result};
use clap::Parser;
use folio::config::{IndexCli, StoreKind};
use folio::content::Corpus;
use folio::indexer;
use folio::telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = IndexCli::parse();

    let corpus = Corpus::load(&cli.content, &cli.about)?;
    let embedder = cli.embedder.build(cli.embedding_max_attempts)?;

    let dims = match cli.store.store {
        StoreKind::Memory => None,
        StoreKind::Pgvector => Some(
            embedder
                .embed(corpus.subject())
                .await
                .context("failed to probe embedding dimension")?
                .len(),
        ),
    };
    let handle = cli.store.open(dims).await?;
    let store = handle.store();

    let plan = cli.plan();
    let report = indexer::run(&corpus, embedder.as_ref(), store.as_ref(), &plan).await?;
    let rows = handle.persist().await?;
    info!(
        generation = %report.generation,
        model = %report.embedding_model,
        documents = report.documents,
        inserted = report.inserted,
        pruned = report.pruned,
        rows,
        "indexer finished"
    );
    Ok(())
}
