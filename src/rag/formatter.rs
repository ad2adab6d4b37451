use std::collections::{BTreeMap, HashSet};

use super::Match;
use crate::models::{FieldSelector, FormattedRecord, FORMATTED_LABELS};

const SYNTHETIC_ID_PREFIX: &str = "doc_";

/// Labels for dataset columns outside the canonical review fields.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    extra: BTreeMap<String, String>,
}

impl LabelTable {
    pub fn new(extra: BTreeMap<String, String>) -> Self {
        Self { extra }
    }

    /// Configured label, or the column name humanized. A label that would
    /// shadow one of the canonical fields gets the column name appended.
    pub fn label(&self, column: &str) -> String {
        let label = self
            .extra
            .get(column)
            .cloned()
            .unwrap_or_else(|| humanize(column));
        if FORMATTED_LABELS.contains(&label.as_str()) {
            format!("{} ({})", label, column)
        } else {
            label
        }
    }
}

/// `reviewer_birth_year` → `Reviewer birth year`.
pub fn humanize(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => key.to_string(),
    }
}

/// Labels one match. `taken` holds the Ids already used in the response.
pub fn format_match(
    m: &Match,
    field: FieldSelector,
    labels: &LabelTable,
    taken: &mut HashSet<String>,
) -> FormattedRecord {
    let record = &m.record;

    let base_id = record
        .id
        .clone()
        .unwrap_or_else(|| format!("{}{}", SYNTHETIC_ID_PREFIX, m.id));
    let mut id = base_id.clone();
    let mut n = 2;
    while !taken.insert(id.clone()) {
        id = format!("{}_{}", base_id, n);
        n += 1;
    }

    let mut formatted = FormattedRecord {
        categoria_principal: m.value.clone(),
        id,
        id_produto: record.product_id.clone(),
        produto: record.product_name.clone(),
        marca: record.product_brand.clone(),
        categoria: record.site_category_lv1.clone(),
        subcategoria: record.site_category_lv2.clone(),
        titulo_avaliacao: record.review_title.clone(),
        avaliacao_geral: record.overall_rating,
        recomendaria_a_um_amigo: record.recommend_to_a_friend.clone(),
        comentario: record.review_text.clone(),
        adicionais: BTreeMap::new(),
    };

    for (column, value) in &record.extra {
        let mut label = labels.label(column);
        if formatted.adicionais.contains_key(&label) {
            label = format!("{} ({})", label, column);
        }
        formatted.adicionais.insert(label, value.clone());
    }

    let matched = Some(m.value.clone());
    match field {
        FieldSelector::ProductName => formatted.produto = matched,
        FieldSelector::ProductBrand => formatted.marca = matched,
        FieldSelector::SiteCategoryLv1 => formatted.categoria = matched,
        FieldSelector::SiteCategoryLv2 => formatted.subcategoria = matched,
    }

    formatted
}

/// Formats `matches` in order; every record gets a distinct `Id`.
pub fn format_matches(matches: &[Match], field: FieldSelector, labels: &LabelTable) -> Vec<FormattedRecord> {
    let mut taken = HashSet::with_capacity(matches.len());
    matches
        .iter()
        .map(|m| format_match(m, field, labels, &mut taken))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReviewRecord;

    fn matched(id: u64, value: &str, record: ReviewRecord) -> Match {
        Match {
            id,
            value: value.to_string(),
            score: 1.0,
            record,
        }
    }

    fn record(id: Option<&str>, name: &str) -> ReviewRecord {
        let mut record = ReviewRecord {
            id: id.map(str::to_string),
            product_name: Some(name.to_string()),
            product_brand: Some("X".to_string()),
            overall_rating: 4,
            review_text: Some("chegou rápido".to_string()),
            ..Default::default()
        };
        record.extra.insert("reviewer_state".into(), Some("SP".into()));
        record.extra.insert("submission_date".into(), None);
        record
    }

    #[test]
    fn humanizes_unknown_keys() {
        assert_eq!(humanize("reviewer_birth_year"), "Reviewer birth year");
        assert_eq!(humanize("STATUS"), "Status");
    }

    #[test]
    fn synthesizes_unique_ids() {
        let matches = vec![
            matched(7, "Produto A", record(None, "Produto A")),
            matched(8, "Produto B", record(Some("r1"), "Produto B")),
            matched(9, "Produto C", record(Some("r1"), "Produto C")),
        ];
        let formatted = format_matches(&matches, FieldSelector::ProductName, &LabelTable::default());
        let ids: Vec<&str> = formatted.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["doc_7", "r1", "r1_2"]);
    }

    #[test]
    fn label_set_is_stable_across_matches() {
        let labels = LabelTable::new(BTreeMap::from([("reviewer_state".to_string(), "Estado".to_string())]));
        let mut sparse = record(None, "Produto B");
        sparse.product_brand = None;
        sparse.review_text = None;
        let matches = vec![
            matched(0, "X", record(Some("a"), "Produto A")),
            matched(1, "Y", sparse),
        ];

        let keys: Vec<Vec<String>> = format_matches(&matches, FieldSelector::ProductBrand, &labels)
            .into_iter()
            .map(|f| {
                let json = serde_json::to_value(f).unwrap();
                let mut keys: Vec<String> = json.as_object().unwrap().keys().cloned().collect();
                keys.sort();
                keys
            })
            .collect();

        assert_eq!(keys[0], keys[1]);
        assert!(keys[0].contains(&"Estado".to_string()));
        assert!(keys[0].contains(&"Submission date".to_string()));
        assert!(keys[0].contains(&"Avaliação Geral".to_string()));
    }

    #[test]
    fn matched_value_fills_its_label() {
        let mut rec = record(None, "Produto A");
        rec.site_category_lv1 = None;
        let formatted = format_matches(
            &[matched(0, "Eletrônicos", rec)],
            FieldSelector::SiteCategoryLv1,
            &LabelTable::default(),
        );
        assert_eq!(formatted[0].categoria.as_deref(), Some("Eletrônicos"));
        assert_eq!(formatted[0].categoria_principal, "Eletrônicos");
        assert_eq!(formatted[0].produto.as_deref(), Some("Produto A"));
    }

    #[test]
    fn extra_labels_never_shadow_fields() {
        let labels = LabelTable::new(BTreeMap::from([
            ("x".to_string(), "Categoria".to_string()),
            ("uf".to_string(), "Estado".to_string()),
            ("reviewer_state".to_string(), "Estado".to_string()),
        ]));
        assert_eq!(labels.label("produto"), "Produto (produto)");
        assert_eq!(labels.label("x"), "Categoria (x)");

        let mut rec = record(Some("r1"), "Produto A");
        rec.extra.insert("produto".into(), Some("outro".into()));
        rec.extra.insert("uf".into(), Some("RJ".into()));
        let formatted = format_matches(&[matched(0, "Produto A", rec)], FieldSelector::ProductName, &labels);

        let json = serde_json::to_string(&formatted[0]).unwrap();
        assert_eq!(json.matches("\"Produto\":").count(), 1);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["Produto"], "Produto A");
        assert_eq!(value["Produto (produto)"], "outro");
        assert_eq!(value["Estado"], "SP");
        assert_eq!(value["Estado (uf)"], "RJ");
    }
}
