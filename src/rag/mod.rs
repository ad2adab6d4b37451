pub mod embeddings;
pub mod formatter;
pub mod index_manager;
pub mod memory_store;
pub mod retriever;
pub mod vector_store;

use std::sync::Arc;

use crate::config::{VectorBackend, VectorConfig};
use crate::error::Result;
use crate::models::{FieldSelector, FormattedRecord, ReviewRecord};
use self::formatter::LabelTable;
use self::memory_store::MemoryStore;
use self::retriever::Retriever;
use self::vector_store::{QdrantStore, VectorStore};

/// One searchable value of a field plus the record it came from.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: u64,
    pub value: String,
    pub embedding: Vec<f32>,
    pub record: ReviewRecord,
}

#[derive(Debug, Clone)]
pub struct Match {
    pub id: u64,
    pub value: String,
    pub score: f32,
    pub record: ReviewRecord,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub fn vector_store_from_config(config: &VectorConfig, dimension: usize) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.backend {
        VectorBackend::Memory => Arc::new(MemoryStore::new()),
        VectorBackend::Qdrant => Arc::new(QdrantStore::new(
            &config.qdrant_url,
            &config.collection_prefix,
            dimension,
        )?),
    };
    Ok(store)
}

/// Retrieval plus formatting, shared by the HTTP handlers and the chat agent.
#[derive(Clone)]
pub struct RagEngine {
    retriever: Retriever,
    labels: Arc<LabelTable>,
}

impl RagEngine {
    pub fn new(retriever: Retriever, labels: LabelTable) -> Self {
        Self {
            retriever,
            labels: Arc::new(labels),
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub async fn search(&self, field: FieldSelector, query: &str, k: usize) -> Result<Vec<FormattedRecord>> {
        let matches = self.retriever.retrieve(field, query, k).await?;
        Ok(formatter::format_matches(&matches, field, &self.labels))
    }

    /// Retrieved reviews rendered as prompt context for a tool call, and the
    /// number of records behind it.
    pub async fn tool_context(&self, field: FieldSelector, query: &str, k: usize) -> Result<(String, usize)> {
        let records = self.search(field, query, k).await?;
        if records.is_empty() {
            return Ok((not_found_message(field).to_string(), 0));
        }

        let blocks: Vec<String> = records.iter().map(|r| tool_block(field, r)).collect();

        Ok((blocks.join("\n\n---\n\n"), records.len()))
    }
}

/// One retrieved review as the chat model sees it. The matched value leads;
/// the product line is left out when the match already is the product name.
fn tool_block(field: FieldSelector, record: &FormattedRecord) -> String {
    let mut lines = vec![format!("{}: {}", field.label(), record.categoria_principal)];
    if field != FieldSelector::ProductName {
        lines.push(format!("Produto: {}", record.produto.as_deref().unwrap_or("-")));
    }
    lines.push(format!(
        "Título da Avaliação: {}",
        record.titulo_avaliacao.as_deref().unwrap_or("-")
    ));
    lines.push(format!("Avaliação Geral: {}", record.avaliacao_geral));
    lines.push(format!("Comentário: {}", record.comentario.as_deref().unwrap_or("-")));
    lines.join("\n")
}

pub fn not_found_message(field: FieldSelector) -> &'static str {
    match field {
        FieldSelector::ProductName => "Nenhum produto encontrado relacionado a essa consulta.",
        FieldSelector::ProductBrand => "Nenhum produto (pela marca) encontrado para essa consulta.",
        FieldSelector::SiteCategoryLv1 => "Nenhum produto encontrado para essa categoria (nível 1).",
        FieldSelector::SiteCategoryLv2 => "Nenhum produto encontrado para essa categoria (nível 2).",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) < 0.0);
    }

    fn record(value: &str) -> FormattedRecord {
        FormattedRecord {
            categoria_principal: value.to_string(),
            id: "r1".to_string(),
            id_produto: None,
            produto: Some("Fone JBL Tune".to_string()),
            marca: Some("jbl".to_string()),
            categoria: None,
            subcategoria: None,
            titulo_avaliacao: Some("Ótimo".to_string()),
            avaliacao_geral: 5,
            recomendaria_a_um_amigo: None,
            comentario: Some("som excelente".to_string()),
            adicionais: Default::default(),
        }
    }

    #[test]
    fn product_line_is_not_repeated_for_name_matches() {
        let block = tool_block(FieldSelector::ProductName, &record("Fone JBL Tune"));
        assert_eq!(block.matches("Produto:").count(), 1);
        assert!(block.starts_with("Produto: Fone JBL Tune\nTítulo da Avaliação: Ótimo"));

        let block = tool_block(FieldSelector::ProductBrand, &record("jbl"));
        assert!(block.starts_with("Marca: jbl\nProduto: Fone JBL Tune\n"));
        assert!(block.ends_with("Comentário: som excelente"));
    }
}
