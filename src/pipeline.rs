use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::Result;
use crate::indexer::load_table;
use crate::rag::embeddings::{self, Embedder};
use crate::rag::formatter::LabelTable;
use crate::rag::index_manager::IndexManager;
use crate::rag::retriever::Retriever;
use crate::rag::{vector_store_from_config, RagEngine};
use crate::store::{ImportReport, RecordStore};

/// Everything between the dataset file and the formatted search results.
pub struct Pipeline {
    pub store: Arc<RecordStore>,
    pub indexes: Arc<IndexManager>,
    pub rag: RagEngine,
    pub report: ImportReport,
}

impl Pipeline {
    /// Reloads the dataset into the record store and wires the retrieval stack.
    /// Indexes are built lazily on first use.
    pub async fn load(config: &AppConfig) -> Result<Self> {
        tracing::info!("Loading reviews from {}", config.store.dataset_path.display());
        let table = load_table(&config.store.dataset_path)?;

        tracing::info!("Connecting to record store: {}", config.store.database_url);
        let store = Arc::new(RecordStore::connect(&config.store.database_url, config.store.max_connections).await?);
        let report = store.import(&table).await?;

        let embedder: Arc<dyn Embedder> = Arc::from(embeddings::from_config(&config.embeddings).await?);
        let vectors = vector_store_from_config(&config.vector, embedder.dimension())?;

        let indexes = Arc::new(IndexManager::new(
            store.clone(),
            embedder,
            vectors,
            config.embeddings.batch_size,
        ));
        let rag = RagEngine::new(
            Retriever::new(indexes.clone()),
            LabelTable::new(config.formatter.labels.clone()),
        );

        Ok(Self {
            store,
            indexes,
            rag,
            report,
        })
    }
}
