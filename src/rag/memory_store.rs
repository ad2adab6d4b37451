use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::vector_store::{rank, VectorStore};
use super::{cosine_similarity, IndexEntry, Match};
use crate::error::Result;
use crate::models::FieldSelector;

struct StoredIndex {
    stamp: String,
    entries: Vec<IndexEntry>,
}

/// Brute-force cosine search held in process memory.
#[derive(Default)]
pub struct MemoryStore {
    indexes: RwLock<HashMap<FieldSelector, StoredIndex>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn replace(&self, field: FieldSelector, stamp: &str, entries: Vec<IndexEntry>) -> Result<()> {
        let index = StoredIndex {
            stamp: stamp.to_string(),
            entries,
        };
        self.indexes.write().await.insert(field, index);
        Ok(())
    }

    async fn stamp(&self, field: FieldSelector) -> Result<Option<String>> {
        Ok(self.indexes.read().await.get(&field).map(|index| index.stamp.clone()))
    }

    async fn search(&self, field: FieldSelector, query: &[f32], limit: usize) -> Result<Vec<Match>> {
        let indexes = self.indexes.read().await;
        let Some(index) = indexes.get(&field) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<Match> = index
            .entries
            .iter()
            .map(|entry| Match {
                id: entry.id,
                value: entry.value.clone(),
                score: cosine_similarity(query, &entry.embedding),
                record: entry.record.clone(),
            })
            .collect();

        matches.sort_by(rank);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn len(&self, field: FieldSelector) -> Result<usize> {
        Ok(self.indexes.read().await.get(&field).map_or(0, |index| index.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReviewRecord;

    fn entry(id: u64, value: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id,
            value: value.to_string(),
            embedding,
            record: ReviewRecord::default(),
        }
    }

    #[tokio::test]
    async fn results_are_ranked_with_stable_ties() {
        let store = MemoryStore::new();
        store
            .replace(
                FieldSelector::ProductBrand,
                "v1",
                vec![
                    entry(0, "far", vec![0.0, 1.0]),
                    entry(1, "tie-a", vec![1.0, 0.0]),
                    entry(2, "tie-b", vec![2.0, 0.0]),
                    entry(3, "near", vec![0.9, 0.1]),
                ],
            )
            .await
            .unwrap();

        let found = store.search(FieldSelector::ProductBrand, &[1.0, 0.0], 3).await.unwrap();
        let values: Vec<&str> = found.iter().map(|m| m.value.as_str()).collect();
        assert_eq!(values, vec!["tie-a", "tie-b", "near"]);
    }

    #[tokio::test]
    async fn fewer_entries_than_limit_is_not_an_error() {
        let store = MemoryStore::new();
        store
            .replace(FieldSelector::ProductName, "v1", vec![entry(0, "only", vec![1.0])])
            .await
            .unwrap();
        assert_eq!(store.search(FieldSelector::ProductName, &[1.0], 10).await.unwrap().len(), 1);
        assert!(store.search(FieldSelector::SiteCategoryLv1, &[1.0], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_discards_previous_entries() {
        let store = MemoryStore::new();
        let field = FieldSelector::SiteCategoryLv2;
        assert_eq!(store.stamp(field).await.unwrap(), None);
        store.replace(field, "v1", vec![entry(0, "a", vec![1.0]), entry(1, "b", vec![1.0])]).await.unwrap();
        store.replace(field, "v2", vec![entry(0, "c", vec![1.0])]).await.unwrap();
        assert_eq!(store.len(field).await.unwrap(), 1);
        assert_eq!(store.stamp(field).await.unwrap().as_deref(), Some("v2"));
    }
}
