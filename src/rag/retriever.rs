use std::sync::Arc;

use super::index_manager::IndexManager;
use super::Match;
use crate::error::{Result, ReviewError};
use crate::models::FieldSelector;

/// Top-k nearest neighbour queries over the field indexes.
#[derive(Clone)]
pub struct Retriever {
    indexes: Arc<IndexManager>,
}

impl Retriever {
    pub fn new(indexes: Arc<IndexManager>) -> Self {
        Self { indexes }
    }

    pub fn indexes(&self) -> &Arc<IndexManager> {
        &self.indexes
    }

    /// At most `k` matches, nearest first. An index with nothing in it yields
    /// an empty result, never an error.
    pub async fn retrieve(&self, field: FieldSelector, query: &str, k: usize) -> Result<Vec<Match>> {
        if k == 0 {
            return Err(ReviewError::Validation("k deve ser maior que zero.".to_string()));
        }

        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        match self.indexes.ensure_index(field).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!("Index {} is empty, nothing to retrieve", field);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        }

        let vector = self.indexes.embedder().embed_one(query).await?;
        let mut matches = self.indexes.vectors().search(field, &vector, k).await?;
        matches.truncate(k);

        tracing::debug!("{} matches for '{}' on {}", matches.len(), query, field);
        Ok(matches)
    }
}
