#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use review_rag::config::AppConfig;
use review_rag::indexer::Table;
use review_rag::llm::{ChatModel, CompletionRequest};
use review_rag::rag::embeddings::HashingEmbedder;
use review_rag::rag::formatter::LabelTable;
use review_rag::rag::index_manager::IndexManager;
use review_rag::rag::memory_store::MemoryStore;
use review_rag::rag::retriever::Retriever;
use review_rag::rag::RagEngine;
use review_rag::server::{router, AppState};
use review_rag::store::RecordStore;
use review_rag::{Result, ReviewError};

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync>;

pub struct ScriptedModel {
    responder: Responder,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(responder: impl Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(&request)
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

/// Canned answers keyed on the structured output requested. Comments
/// containing "FALHA" make the model fail.
pub fn default_model() -> Arc<ScriptedModel> {
    Arc::new(ScriptedModel::new(|request| {
        let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        if prompt.contains("FALHA") {
            return Err(ReviewError::Upstream {
                service: "llm".to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }

        let answer = match request.schema.as_ref().map(|s| s.name) {
            Some("sentimento") if prompt.contains("ruim") => {
                r#"{"sentimento": "NEGATIVO", "topicos": [{"topico": "qualidade", "sentimento": "NEGATIVO", "justificativa": "ruim"}], "incoerencia": false}"#
            }
            Some("sentimento") => {
                r#"{"sentimento": "POSITIVO", "topicos": [{"topico": "qualidade", "sentimento": "POSITIVO", "justificativa": "bom"}], "incoerencia": false}"#
            }
            Some("topicos") => r#"{"topicos": ["qualidade do som", "entrega rápida"]}"#,
            Some("resumo") => r#"{"resumo": "Clientes elogiam a qualidade."}"#,
            Some("intencao") => r#"{"intencao": "nome_produto", "consulta": "Produto A"}"#,
            _ => "O Produto A é bem avaliado.",
        };
        Ok(answer.to_string())
    }))
}

pub fn review_table() -> Table {
    let headers = [
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
        "reviewer_state",
    ];
    let row = |cells: [&str; 11]| -> Vec<Option<String>> {
        cells
            .iter()
            .map(|c| if c.is_empty() { None } else { Some(c.to_string()) })
            .collect()
    };

    Table {
        headers: headers.iter().map(|h| h.to_string()).collect(),
        rows: vec![
            row(["r1", "p1", "Produto A", "X", "Eletrônicos", "Fones", "5", "Yes", "Ótimo", "som muito bom", "SP"]),
            row(["r2", "p1", "Produto A", "X", "Eletrônicos", "Fones", "4", "Yes", "Bom", "gostei bastante", "RJ"]),
            row(["r3", "p1", "Produto A", "X", "Eletrônicos", "Fones", "1", "No", "Péssimo", "muito ruim", "MG"]),
            row(["", "p2", "Produto B", "Y", "Casa", "Cozinha", "3", "Yes", "Ok", "cumpre o prometido", ""]),
            row(["", "p2", "Produto B", "Y", "Casa", "Cozinha", "2", "No", "Fraco", "veio riscado", "BA"]),
        ],
        fingerprint: "test".to_string(),
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.max_attempts = 2;
    config.retry.base_backoff_ms = 0;
    config.retry.attempt_timeout_secs = 5;
    config
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<RecordStore>,
    pub model: Arc<ScriptedModel>,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(review_table(), default_model()).await
}

pub async fn spawn_app_with(table: Table, model: Arc<ScriptedModel>) -> TestApp {
    let config = Arc::new(test_config());

    let store = Arc::new(RecordStore::connect("sqlite::memory:", 1).await.unwrap());
    store.import(&table).await.unwrap();

    let indexes = Arc::new(IndexManager::new(
        store.clone(),
        Arc::new(HashingEmbedder::new(256)),
        Arc::new(MemoryStore::new()),
        config.embeddings.batch_size,
    ));
    let rag = RagEngine::new(
        Retriever::new(indexes),
        LabelTable::new(config.formatter.labels.clone()),
    );

    let state = AppState::new(config, store.clone(), rag, model.clone()).unwrap();

    TestApp {
        router: router(Arc::new(state)),
        store,
        model,
    }
}

pub async fn get(app: &TestApp, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post(app: &TestApp, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, json)
}
