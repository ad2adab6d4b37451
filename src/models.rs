use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Result, ReviewError};

/// Dataset columns with a fixed meaning. Anything else read from the dataset
/// travels in [`ReviewRecord::extra`].
pub const REVIEW_COLUMNS: [&str; 10] = [
    "id",
    "product_id",
    "product_name",
    "product_brand",
    "site_category_lv1",
    "site_category_lv2",
    "overall_rating",
    "recommend_to_a_friend",
    "review_title",
    "review_text",
];

pub const RATING_COLUMN: &str = "overall_rating";

/// The four review fields that carry a semantic index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSelector {
    ProductName,
    ProductBrand,
    SiteCategoryLv1,
    SiteCategoryLv2,
}

impl FieldSelector {
    pub const ALL: [FieldSelector; 4] = [
        FieldSelector::ProductName,
        FieldSelector::ProductBrand,
        FieldSelector::SiteCategoryLv1,
        FieldSelector::SiteCategoryLv2,
    ];

    pub fn column(self) -> &'static str {
        match self {
            FieldSelector::ProductName => "product_name",
            FieldSelector::ProductBrand => "product_brand",
            FieldSelector::SiteCategoryLv1 => "site_category_lv1",
            FieldSelector::SiteCategoryLv2 => "site_category_lv2",
        }
    }

    /// Label of the matched value in a formatted record.
    pub fn label(self) -> &'static str {
        match self {
            FieldSelector::ProductName => "Produto",
            FieldSelector::ProductBrand => "Marca",
            FieldSelector::SiteCategoryLv1 => "Categoria",
            FieldSelector::SiteCategoryLv2 => "Subcategoria",
        }
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for FieldSelector {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self> {
        FieldSelector::ALL
            .into_iter()
            .find(|field| field.column() == s)
            .ok_or_else(|| ReviewError::Validation("Parâmetro 'search' inválido.".to_string()))
    }
}

/// One customer review as stored in the record store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: Option<String>,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub product_brand: Option<String>,
    pub site_category_lv1: Option<String>,
    pub site_category_lv2: Option<String>,
    pub overall_rating: i64,
    pub recommend_to_a_friend: Option<String>,
    pub review_title: Option<String>,
    pub review_text: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Option<String>>,
}

impl ReviewRecord {
    /// Builds a record from `(column, value)` pairs. The rating must parse as an integer.
    pub fn from_columns<I>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        let mut record = ReviewRecord::default();
        let mut rating: Option<i64> = None;

        for (column, value) in columns {
            let value = value.filter(|v| !v.trim().is_empty());
            match column.as_str() {
                "id" => record.id = value,
                "product_id" => record.product_id = value,
                "product_name" => record.product_name = value,
                "product_brand" => record.product_brand = value,
                "site_category_lv1" => record.site_category_lv1 = value,
                "site_category_lv2" => record.site_category_lv2 = value,
                "recommend_to_a_friend" => record.recommend_to_a_friend = value,
                "review_title" => record.review_title = value,
                "review_text" => record.review_text = value,
                RATING_COLUMN => rating = Some(parse_rating(value.as_deref())?),
                _ => {
                    record.extra.insert(column, value);
                }
            }
        }

        record.overall_rating = rating.ok_or_else(|| {
            ReviewError::Validation(format!("coluna obrigatória ausente: {}", RATING_COLUMN))
        })?;
        Ok(record)
    }

    pub fn field(&self, field: FieldSelector) -> Option<&str> {
        match field {
            FieldSelector::ProductName => self.product_name.as_deref(),
            FieldSelector::ProductBrand => self.product_brand.as_deref(),
            FieldSelector::SiteCategoryLv1 => self.site_category_lv1.as_deref(),
            FieldSelector::SiteCategoryLv2 => self.site_category_lv2.as_deref(),
        }
    }
}

pub fn parse_rating(value: Option<&str>) -> Result<i64> {
    let raw = value.map(str::trim).unwrap_or_default();
    raw.parse::<i64>()
        .map_err(|_| ReviewError::Validation(format!("overall_rating não é um inteiro: '{}'", raw)))
}

/// Keys of the labeled fields of [`FormattedRecord`]. Extra columns may not reuse them.
pub const FORMATTED_LABELS: [&str; 11] = [
    "Categoria Principal",
    "Id",
    "Id do Produto",
    "Produto",
    "Marca",
    "Categoria",
    "Subcategoria",
    "Título da Avaliação",
    "Avaliação Geral",
    "Recomendaria a um amigo",
    "Comentário",
];

/// Canonical labeled record returned by every retrieval path.
///
/// The labeled fields are always present (null when the source lacks them);
/// dataset columns outside the canonical set land in `adicionais`, keyed by
/// their configured or humanized label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedRecord {
    #[serde(rename = "Categoria Principal")]
    pub categoria_principal: String,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Id do Produto")]
    pub id_produto: Option<String>,
    #[serde(rename = "Produto")]
    pub produto: Option<String>,
    #[serde(rename = "Marca")]
    pub marca: Option<String>,
    #[serde(rename = "Categoria")]
    pub categoria: Option<String>,
    #[serde(rename = "Subcategoria")]
    pub subcategoria: Option<String>,
    #[serde(rename = "Título da Avaliação")]
    pub titulo_avaliacao: Option<String>,
    #[serde(rename = "Avaliação Geral")]
    pub avaliacao_geral: i64,
    #[serde(rename = "Recomendaria a um amigo")]
    pub recomendaria_a_um_amigo: Option<String>,
    #[serde(rename = "Comentário")]
    pub comentario: Option<String>,
    #[serde(flatten)]
    pub adicionais: BTreeMap<String, Option<String>>,
}

/// Comment payload accepted by the batch endpoints. Accepts both the labeled
/// names and the snake_case field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComentarioInput {
    #[serde(rename = "Categoria Principal", alias = "categoria_principal", default)]
    pub categoria_principal: Option<String>,
    #[serde(rename = "Produto", alias = "produto", default)]
    pub produto: Option<String>,
    #[serde(rename = "Marca", alias = "marca", default)]
    pub marca: Option<String>,
    #[serde(rename = "Categoria", alias = "categoria", default)]
    pub categoria: Option<String>,
    #[serde(rename = "Subcategoria", alias = "subcategoria", default)]
    pub subcategoria: Option<String>,
    #[serde(rename = "Título da Avaliação", alias = "titulo_avaliacao", default)]
    pub titulo_avaliacao: Option<String>,
    #[serde(rename = "Avaliação Geral", alias = "avaliacao_geral")]
    pub avaliacao_geral: i64,
    #[serde(rename = "Recomendaria a um amigo", alias = "recomendaria_a_um_amigo", default)]
    pub recomendaria_a_um_amigo: Option<String>,
    #[serde(rename = "Comentário", alias = "comentario", default)]
    pub comentario: Option<String>,
    #[serde(rename = "Id", alias = "id", default)]
    pub id: Option<String>,
}

impl From<FormattedRecord> for ComentarioInput {
    fn from(record: FormattedRecord) -> Self {
        Self {
            categoria_principal: Some(record.categoria_principal),
            produto: record.produto,
            marca: record.marca,
            categoria: record.categoria,
            subcategoria: record.subcategoria,
            titulo_avaliacao: record.titulo_avaliacao,
            avaliacao_geral: record.avaliacao_geral,
            recomendaria_a_um_amigo: record.recomendaria_a_um_amigo,
            comentario: record.comentario,
            id: Some(record.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComentariosInput {
    pub comentarios: Vec<ComentarioInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentimentLabel {
    #[serde(rename = "POSITIVO", alias = "Positivo", alias = "positivo", alias = "POSITIVE")]
    Positivo,
    #[serde(rename = "NEGATIVO", alias = "Negativo", alias = "negativo", alias = "NEGATIVE")]
    Negativo,
    #[serde(rename = "NEUTRO", alias = "Neutro", alias = "neutro", alias = "NEUTRAL")]
    Neutro,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSentiment {
    pub topico: String,
    pub sentimento: SentimentLabel,
    #[serde(default)]
    pub justificativa: String,
}

/// Percentage split over a set of labels, serialized as `"NN%"` strings.
/// The three values always add up to 100 for a non-empty set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SentimentShare {
    pub positivos: u32,
    pub negativos: u32,
    pub neutros: u32,
}

impl SentimentShare {
    /// Largest-remainder apportionment of 100 points across the three labels.
    pub fn from_labels(labels: &[SentimentLabel]) -> Self {
        let total = labels.len() as u64;
        if total == 0 {
            return Self::default();
        }

        let counts = [
            SentimentLabel::Positivo,
            SentimentLabel::Negativo,
            SentimentLabel::Neutro,
        ]
        .map(|label| labels.iter().filter(|l| **l == label).count() as u64);

        let mut shares = counts.map(|c| c * 100 / total);
        let remainders = counts.map(|c| c * 100 % total);
        let mut missing = 100 - shares.iter().sum::<u64>();

        let mut order = [0usize, 1, 2];
        order.sort_by(|a, b| remainders[*b].cmp(&remainders[*a]));
        for idx in order {
            if missing == 0 {
                break;
            }
            if remainders[idx] > 0 {
                shares[idx] += 1;
                missing -= 1;
            }
        }

        Self {
            positivos: shares[0] as u32,
            negativos: shares[1] as u32,
            neutros: shares[2] as u32,
        }
    }

    pub fn total(&self) -> u32 {
        self.positivos + self.negativos + self.neutros
    }
}

impl Serialize for SentimentShare {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SentimentShare", 3)?;
        state.serialize_field("Positivos", &format!("{}%", self.positivos))?;
        state.serialize_field("Negativos", &format!("{}%", self.negativos))?;
        state.serialize_field("Neutros", &format!("{}%", self.neutros))?;
        state.end()
    }
}

/// Sentiment analysis of a single comment.
#[derive(Debug, Clone, Serialize)]
pub struct SentimentBreakdown {
    pub sentimento: SentimentLabel,
    pub topicos: Vec<TopicSentiment>,
    /// Text sentiment and numeric rating disagree.
    pub incoerencia: bool,
    #[serde(rename = "Sentimentos")]
    pub percentuais: SentimentShare,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topics {
    #[serde(alias = "topics")]
    pub topicos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(alias = "sumarizacao", alias = "summary")]
    pub resumo: String,
}

/// Result slot of a batch item; failures keep their position.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchSlot<T> {
    Ok(T),
    Failed { erro: String },
}

impl<T> BatchSlot<T> {
    pub fn ok(&self) -> Option<&T> {
        match self {
            BatchSlot::Ok(value) => Some(value),
            BatchSlot::Failed { .. } => None,
        }
    }
}

impl<T> From<Result<T>> for BatchSlot<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => BatchSlot::Ok(value),
            Err(e) => BatchSlot::Failed { erro: e.into_http().1 },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SentimentosResponse {
    pub sentimentos: Vec<BatchSlot<SentimentBreakdown>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geral: Option<SentimentShare>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicResult {
    pub comentario: ComentarioInput,
    pub topicos_principais: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erro: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicosResponse {
    pub result: Vec<TopicResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentimentoGeralResponse {
    pub total_comentarios: usize,
    pub falhas: usize,
    pub sentimentos: Option<SentimentShare>,
    pub sumarizacao: Option<Summary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mensagem: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub ferramenta: String,
    pub consulta: String,
    pub resultados: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub resposta: String,
    pub thread_id: String,
    pub intencao: String,
    pub ferramentas: Vec<ToolCall>,
}
