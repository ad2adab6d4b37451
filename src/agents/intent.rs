use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use super::prompts::INTENT_SYSTEM;
use crate::error::Result;
use crate::llm::{parse_structured, ChatModel, CompletionRequest, Message, OutputSchema, RetryPolicy};
use crate::models::FieldSelector;

const SCHEMA_NAME: &str = "intencao";

// Messages made only of greetings
static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[\s,!.?]*(?:(?:oi+e?|ol[aá]+|opa|e a[ií]|eae|bom dia|boa tarde|boa noite|tudo (?:bem|bom|certo)|como vai(?: voc[eê])?|hello|hi|hey|sauda[cç][oõ]es)[\s,!.?]*)+$").unwrap()
});

/// A retrieval tool the chat agent can call.
#[derive(Debug)]
pub struct Tool {
    pub name: &'static str,
    pub field: FieldSelector,
    pub description: &'static str,
}

pub static TOOLS: [Tool; 4] = [
    Tool {
        name: "busca_por_nome_produto",
        field: FieldSelector::ProductName,
        description: "produtos similares pelo nome, com título, nota e texto da avaliação",
    },
    Tool {
        name: "busca_por_marca_produto",
        field: FieldSelector::ProductBrand,
        description: "produtos similares pela marca",
    },
    Tool {
        name: "busca_por_categoria_lv1",
        field: FieldSelector::SiteCategoryLv1,
        description: "produtos pela categoria de nível 1",
    },
    Tool {
        name: "busca_por_categoria_lv2",
        field: FieldSelector::SiteCategoryLv2,
        description: "produtos pela categoria de nível 2",
    },
];

pub fn tool_for(field: FieldSelector) -> &'static Tool {
    match field {
        FieldSelector::ProductName => &TOOLS[0],
        FieldSelector::ProductBrand => &TOOLS[1],
        FieldSelector::SiteCategoryLv1 => &TOOLS[2],
        FieldSelector::SiteCategoryLv2 => &TOOLS[3],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    NameQuery(String),
    BrandQuery(String),
    CategoryLv1Query(String),
    CategoryLv2Query(String),
    Greeting,
    Clarify,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::NameQuery(_) => "nome_produto",
            Intent::BrandQuery(_) => "marca_produto",
            Intent::CategoryLv1Query(_) => "categoria_lv1",
            Intent::CategoryLv2Query(_) => "categoria_lv2",
            Intent::Greeting => "saudacao",
            Intent::Clarify => "esclarecimento",
        }
    }

    /// Tool and search text for retrieval intents.
    pub fn tool(&self) -> Option<(&'static Tool, &str)> {
        match self {
            Intent::NameQuery(q) => Some((tool_for(FieldSelector::ProductName), q)),
            Intent::BrandQuery(q) => Some((tool_for(FieldSelector::ProductBrand), q)),
            Intent::CategoryLv1Query(q) => Some((tool_for(FieldSelector::SiteCategoryLv1), q)),
            Intent::CategoryLv2Query(q) => Some((tool_for(FieldSelector::SiteCategoryLv2), q)),
            Intent::Greeting | Intent::Clarify => None,
        }
    }
}

pub fn is_greeting(message: &str) -> bool {
    GREETING.is_match(message)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum IntentKind {
    NomeProduto,
    MarcaProduto,
    CategoriaLv1,
    CategoriaLv2,
    Saudacao,
    Esclarecimento,
}

#[derive(Debug, Deserialize)]
struct ModelIntent {
    intencao: IntentKind,
    #[serde(default)]
    consulta: Option<String>,
}

fn schema() -> OutputSchema {
    OutputSchema {
        name: SCHEMA_NAME,
        schema: json!({
            "type": "object",
            "properties": {
                "intencao": {
                    "type": "string",
                    "enum": ["nome_produto", "marca_produto", "categoria_lv1", "categoria_lv2", "saudacao", "esclarecimento"]
                },
                "consulta": { "type": "string" }
            },
            "required": ["intencao", "consulta"],
            "additionalProperties": false
        }),
    }
}

#[derive(Clone)]
pub struct IntentClassifier {
    model: Arc<dyn ChatModel>,
    retry: RetryPolicy,
}

impl IntentClassifier {
    pub fn new(model: Arc<dyn ChatModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    /// Greetings are recognised without a model call; everything else is
    /// classified by the model with the recent history as context.
    pub async fn classify(&self, history: &[Message], message: &str) -> Result<Intent> {
        if is_greeting(message) {
            return Ok(Intent::Greeting);
        }

        let mut messages = vec![Message::system(INTENT_SYSTEM)];
        messages.extend(history.iter().cloned());
        messages.push(Message::user(message));
        let request = CompletionRequest::new(messages).with_schema(schema());

        let parsed: ModelIntent = self
            .retry
            .run(SCHEMA_NAME, || {
                let request = request.clone();
                async move {
                    let text = self.model.complete(request).await?;
                    parse_structured::<ModelIntent>(SCHEMA_NAME, &text)
                }
            })
            .await?;

        let query = parsed
            .consulta
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| message.trim().to_string());

        let intent = match parsed.intencao {
            IntentKind::NomeProduto => Intent::NameQuery(query),
            IntentKind::MarcaProduto => Intent::BrandQuery(query),
            IntentKind::CategoriaLv1 => Intent::CategoryLv1Query(query),
            IntentKind::CategoriaLv2 => Intent::CategoryLv2Query(query),
            IntentKind::Saudacao => Intent::Greeting,
            IntentKind::Esclarecimento => Intent::Clarify,
        };

        tracing::debug!("Classified '{}' as {}", message, intent.name());
        Ok(intent)
    }
}
