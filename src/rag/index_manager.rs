use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::embeddings::Embedder;
use super::vector_store::VectorStore;
use super::IndexEntry;
use crate::error::{Result, ReviewError};
use crate::models::FieldSelector;
use crate::store::RecordStore;

#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub field: FieldSelector,
    pub entries: usize,
    /// Record store generation the index was built from.
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    /// Taken over from the vector store instead of embedded by this process.
    pub reused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub store_generation: u64,
    pub indexes: Vec<IndexSummary>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct BuildState {
    built: BTreeMap<FieldSelector, IndexSummary>,
    last_error: Option<String>,
}

/// Builds the per-field indexes and caches them until the record store is
/// reloaded. Builds are serialized behind one lock.
///
/// Every index is stamped with the dataset fingerprint and the embedding
/// dimension, so an index left in a persistent vector store by an earlier
/// process (the `review-indexer` binary, a previous server run) is reused
/// when the same dataset is loaded again.
pub struct IndexManager {
    store: Arc<RecordStore>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    batch_size: usize,
    state: Mutex<BuildState>,
}

impl IndexManager {
    pub fn new(
        store: Arc<RecordStore>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            vectors,
            batch_size: batch_size.max(1),
            state: Mutex::new(BuildState::default()),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn vectors(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    pub async fn status(&self) -> IndexStatus {
        let state = self.state.lock().await;
        IndexStatus {
            store_generation: self.store.generation(),
            indexes: state.built.values().cloned().collect(),
            last_error: state.last_error.clone(),
        }
    }

    /// Returns the cached index for `field`, building it when the record
    /// store changed since the last build.
    pub async fn ensure_index(&self, field: FieldSelector) -> Result<IndexSummary> {
        let mut state = self.state.lock().await;
        let generation = self.store.generation();

        if let Some(summary) = state.built.get(&field) {
            if summary.generation == generation {
                return Ok(summary.clone());
            }
        }

        if let Some(summary) = self.adopt(field, generation).await? {
            state.built.insert(field, summary.clone());
            return Ok(summary);
        }

        self.build_locked(&mut state, field, generation).await
    }

    /// `None` when the dataset has no fingerprint (nothing to compare against).
    async fn current_stamp(&self) -> Option<String> {
        let fingerprint = self.store.fingerprint().await;
        if fingerprint.is_empty() {
            return None;
        }
        Some(format!("{}-d{}", fingerprint, self.embedder.dimension()))
    }

    /// Reuses the stored index of `field` when its stamp matches the loaded dataset.
    async fn adopt(&self, field: FieldSelector, generation: u64) -> Result<Option<IndexSummary>> {
        let Some(expected) = self.current_stamp().await else {
            return Ok(None);
        };
        if self.vectors.stamp(field).await?.as_deref() != Some(expected.as_str()) {
            return Ok(None);
        }

        let entries = self.vectors.len(field).await?;
        if entries == 0 {
            return Ok(None);
        }

        tracing::info!("Reusing stored index for {} ({} entries, stamp {})", field, entries, expected);
        Ok(Some(IndexSummary {
            field,
            entries,
            generation,
            built_at: Utc::now(),
            reused: true,
        }))
    }

    /// Unconditional rebuild of one field's index.
    pub async fn build_index(&self, field: FieldSelector) -> Result<IndexSummary> {
        let mut state = self.state.lock().await;
        let generation = self.store.generation();
        self.build_locked(&mut state, field, generation).await
    }

    async fn build_locked(
        &self,
        state: &mut BuildState,
        field: FieldSelector,
        generation: u64,
    ) -> Result<IndexSummary> {
        match self.do_build(field, generation).await {
            Ok(summary) => {
                state.built.insert(field, summary.clone());
                state.last_error = None;
                Ok(summary)
            }
            Err(e) => {
                state.built.remove(&field);
                if !e.is_not_found() {
                    let message = format!("Indexing {} failed: {}", field, e);
                    tracing::error!("{}", message);
                    state.last_error = Some(message);
                }
                Err(e)
            }
        }
    }

    async fn do_build(&self, field: FieldSelector, generation: u64) -> Result<IndexSummary> {
        let records = self.store.representatives(field).await?;
        if records.is_empty() {
            tracing::warn!("No values to index for {}", field);
            return Err(ReviewError::EmptyCorpus(field.column().to_string()));
        }

        tracing::info!("Indexing {} distinct values of {}", records.len(), field);

        let mut entries = Vec::with_capacity(records.len());
        for batch in records.chunks(self.batch_size) {
            let texts: Vec<String> = batch
                .iter()
                .map(|r| r.field(field).unwrap_or_default().to_string())
                .collect();
            let embeddings = self.embedder.embed(texts.clone()).await?;
            if embeddings.len() != texts.len() {
                return Err(ReviewError::Embedding(format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    embeddings.len()
                )));
            }

            for ((record, value), embedding) in batch.iter().zip(texts).zip(embeddings) {
                entries.push(IndexEntry {
                    id: entries.len() as u64,
                    value,
                    embedding,
                    record: record.clone(),
                });
            }
        }

        let count = entries.len();
        let stamp = self.current_stamp().await.unwrap_or_default();
        self.vectors.replace(field, &stamp, entries).await?;

        tracing::info!("Index for {} ready: {} entries", field, count);
        Ok(IndexSummary {
            field,
            entries: count,
            generation,
            built_at: Utc::now(),
            reused: false,
        })
    }
}
