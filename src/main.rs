use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use review_rag::llm::{ChatModel, LlmClient};
use review_rag::models::FieldSelector;
use review_rag::pipeline::Pipeline;
use review_rag::server::{router, AppState};
use review_rag::{logging, AppConfig};

#[derive(Parser, Debug)]
#[command(name = "review-rag")]
#[command(about = "Review search and analysis API")]
struct Args {
    /// Configuration file (defaults to ./review-rag.toml when present)
    #[arg(short, long, env = "REVIEW_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Build all four field indexes before accepting requests
    #[arg(long)]
    warm: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let config = Arc::new(AppConfig::load(args.config.as_deref())?);
    tracing::info!("LLM endpoint: {} ({})", config.llm.base_url, config.llm.model);
    tracing::info!("Embeddings: {:?}, vector backend: {:?}", config.embeddings.provider, config.vector.backend);

    let pipeline = Pipeline::load(&config).await?;
    tracing::info!(
        "Record store ready: {} reviews, {} skipped",
        pipeline.report.rows_loaded,
        pipeline.report.rows_skipped
    );

    if args.warm {
        for field in FieldSelector::ALL {
            match pipeline.indexes.ensure_index(field).await {
                Ok(summary) => tracing::info!("Index {} warmed: {} entries", field, summary.entries),
                Err(e) => tracing::warn!("Index {} not built: {}", field, e),
            }
        }
    }

    let model: Arc<dyn ChatModel> = Arc::new(LlmClient::new(
        &config.llm,
        Duration::from_secs(config.retry.attempt_timeout_secs),
    )?);

    let state = Arc::new(AppState::new(config.clone(), pipeline.store, pipeline.rag, model)?);

    let sweeper = state.clone();
    let sweep_every = Duration::from_secs(config.agent.thread_idle_secs.clamp(1, 300));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(sweep_every).await;
            let evicted = sweeper.chat.memory().evict_idle().await;
            if evicted > 0 {
                tracing::debug!("Forgot {} idle conversations", evicted);
            }
        }
    });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!("Review API listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
