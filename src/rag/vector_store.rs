use std::cmp::Ordering;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, CountPointsBuilder, CreateCollectionBuilder, Distance, PointStruct,
    ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{IndexEntry, Match};
use crate::error::{Result, ReviewError};
use crate::models::{FieldSelector, ReviewRecord};

const UPSERT_BATCH: usize = 256;
const STAMP_KEY: &str = "stamp";

/// Nearest-neighbour storage, one logical index per field.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Drops whatever the field's index held and stores `entries` instead,
    /// tagged with `stamp`.
    async fn replace(&self, field: FieldSelector, stamp: &str, entries: Vec<IndexEntry>) -> Result<()>;

    /// Stamp the field's index was last built with, if it exists.
    async fn stamp(&self, field: FieldSelector) -> Result<Option<String>>;

    /// Up to `limit` entries by descending cosine similarity; ties keep
    /// insertion order.
    async fn search(&self, field: FieldSelector, query: &[f32], limit: usize) -> Result<Vec<Match>>;

    async fn len(&self, field: FieldSelector) -> Result<usize>;
}

/// Descending score, then ascending entry id.
pub(crate) fn rank(a: &Match, b: &Match) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.id.cmp(&b.id))
}

fn qdrant_error(e: qdrant_client::QdrantError) -> ReviewError {
    ReviewError::VectorStore(e.to_string())
}

/// Qdrant-backed store: one collection per field, named `{prefix}_{column}`.
pub struct QdrantStore {
    client: Qdrant,
    prefix: String,
    dimension: u64,
}

impl QdrantStore {
    pub fn new(url: &str, prefix: &str, dimension: usize) -> Result<Self> {
        tracing::info!("Building Qdrant client for URL: {}", url);
        let client = Qdrant::from_url(url).build().map_err(|e| {
            tracing::error!("Qdrant client build failed: {:?}", e);
            qdrant_error(e)
        })?;

        Ok(Self {
            client,
            prefix: prefix.to_string(),
            dimension: dimension as u64,
        })
    }

    pub fn collection_name(&self, field: FieldSelector) -> String {
        format!("{}_{}", self.prefix, field.column())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn replace(&self, field: FieldSelector, stamp: &str, entries: Vec<IndexEntry>) -> Result<()> {
        let name = self.collection_name(field);

        if self.client.collection_exists(&name).await.map_err(qdrant_error)? {
            self.client
                .delete_collection(name.as_str())
                .await
                .map_err(qdrant_error)?;
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&name)
                    .vectors_config(VectorParamsBuilder::new(self.dimension, Distance::Cosine)),
            )
            .await
            .map_err(qdrant_error)?;

        for batch in entries.chunks(UPSERT_BATCH) {
            let mut points = Vec::with_capacity(batch.len());
            for entry in batch {
                let mut payload = JsonMap::new();
                payload.insert("value".to_string(), JsonValue::String(entry.value.clone()));
                payload.insert(STAMP_KEY.to_string(), JsonValue::String(stamp.to_string()));
                payload.insert(
                    "record".to_string(),
                    JsonValue::String(serde_json::to_string(&entry.record)?),
                );
                points.push(PointStruct::new(entry.id, entry.embedding.clone(), payload));
            }

            self.client
                .upsert_points(UpsertPointsBuilder::new(&name, points).wait(true))
                .await
                .map_err(qdrant_error)?;
        }

        tracing::debug!("Collection {} holds {} points", name, entries.len());
        Ok(())
    }

    async fn stamp(&self, field: FieldSelector) -> Result<Option<String>> {
        let name = self.collection_name(field);
        if !self.client.collection_exists(&name).await.map_err(qdrant_error)? {
            return Ok(None);
        }

        // Every point carries the stamp; one is enough.
        let response = self
            .client
            .scroll(ScrollPointsBuilder::new(&name).limit(1).with_payload(true))
            .await
            .map_err(qdrant_error)?;

        Ok(response
            .result
            .first()
            .and_then(|point| point.payload.get(STAMP_KEY))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    async fn search(&self, field: FieldSelector, query: &[f32], limit: usize) -> Result<Vec<Match>> {
        let name = self.collection_name(field);
        if !self.client.collection_exists(&name).await.map_err(qdrant_error)? {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&name, query.to_vec(), limit as u64).with_payload(true),
            )
            .await
            .map_err(qdrant_error)?;

        let mut matches = Vec::with_capacity(response.result.len());
        for point in response.result {
            let id = match point.id.and_then(|id| id.point_id_options) {
                Some(PointIdOptions::Num(num)) => num,
                _ => continue,
            };
            let value = match point.payload.get("value").and_then(|v| v.as_str()) {
                Some(v) => v.to_string(),
                None => continue,
            };
            let record: ReviewRecord = match point.payload.get("record").and_then(|v| v.as_str()) {
                Some(raw) => serde_json::from_str(raw)?,
                None => continue,
            };
            matches.push(Match {
                id,
                value,
                score: point.score,
                record,
            });
        }

        matches.sort_by(rank);
        Ok(matches)
    }

    async fn len(&self, field: FieldSelector) -> Result<usize> {
        let name = self.collection_name(field);
        if !self.client.collection_exists(&name).await.map_err(qdrant_error)? {
            return Ok(0);
        }
        let response = self
            .client
            .count(CountPointsBuilder::new(&name).exact(true))
            .await
            .map_err(qdrant_error)?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}
