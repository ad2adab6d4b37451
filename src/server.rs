use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::agents::{
    aggregate_share, fan_out, ChatAgent, ConversationStore, SentimentClassifier, Summarizer, TopicExtractor,
};
use crate::config::AppConfig;
use crate::error::{Result, ReviewError};
use crate::llm::{ChatModel, RetryPolicy};
use crate::models::{
    BatchSlot, ChatBody, ChatReply, ComentarioInput, ComentariosInput, FieldSelector, FormattedRecord,
    SentimentoGeralResponse, SentimentosResponse, Summary, TopicResult, TopicosResponse,
};
use crate::rag::index_manager::IndexStatus;
use crate::rag::{not_found_message, RagEngine};
use crate::store::RecordStore;

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, String)>;

static LOCALHOST_ORIGIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:localhost|127\.0\.0\.1)(?::[0-9]+)?$").unwrap()
});

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<RecordStore>,
    pub rag: RagEngine,
    pub model: Arc<dyn ChatModel>,
    pub topics: TopicExtractor,
    pub summarizer: Summarizer,
    pub sentiment: SentimentClassifier,
    pub chat: ChatAgent,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<RecordStore>,
        rag: RagEngine,
        model: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config.retry);
        let agent = &config.agent;

        Ok(Self {
            topics: TopicExtractor::new(model.clone(), retry),
            summarizer: Summarizer::new(model.clone(), retry, agent.summary_token_budget)?,
            sentiment: SentimentClassifier::new(model.clone(), retry),
            chat: ChatAgent::new(
                model.clone(),
                retry,
                rag.clone(),
                ConversationStore::new(
                    agent.history_messages,
                    Duration::from_secs(agent.thread_idle_secs),
                    agent.max_threads,
                ),
                agent.tool_top_k,
            ),
            config,
            store,
            rag,
            model,
        })
    }
}

fn failure(e: ReviewError) -> (StatusCode, String) {
    let (status, message) = e.into_http();
    if status.is_server_error() {
        tracing::error!("Request failed ({}): {}", status, message);
    } else {
        tracing::debug!("Request rejected ({}): {}", status, message);
    }
    (status, message)
}

pub fn cors_layer(allowed: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            allowed.contains(origin)
                || origin.to_str().map(|o| LOCALHOST_ORIGIN.is_match(o)).unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/", get(root))
        .route("/model", get(model_info))
        .route("/health", get(health_check))
        .route("/indices", get(index_status))
        .route("/product_name/:query", get(search_product_name))
        .route("/product_brand/:query", get(search_product_brand))
        .route("/site_category_lv1/:query", get(search_category_lv1))
        .route("/site_category_lv2/:query", get(search_category_lv2))
        .route("/sentimentos", post(sentimentos))
        .route("/gerador_topicos", post(gerador_topicos))
        .route("/sumarizacao", post(sumarizacao))
        .route("/chat", post(chat))
        .route("/sentimento_geral/:search/:query/:qtd_comentario", get(sentimento_geral))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Hello World" }))
}

async fn model_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": state.model.model_name() }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let database = state.store.health_check().await;
    let reviews = state.store.count().await.unwrap_or(0);
    let llm = state.model.health_check().await;
    let conversations = state.chat.memory().thread_count().await;

    Json(serde_json::json!({
        "status": if database && llm { "healthy" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339(),
        "reviews": reviews,
        "conversations": conversations,
        "services": {
            "database": database,
            "llm": llm
        }
    }))
}

async fn index_status(State(state): State<Arc<AppState>>) -> Json<IndexStatus> {
    Json(state.rag.retriever().indexes().status().await)
}

async fn search(state: &AppState, field: FieldSelector, query: &str) -> ApiResult<Vec<FormattedRecord>> {
    let records = state
        .rag
        .search(field, query, state.config.agent.direct_top_k)
        .await
        .map_err(failure)?;
    Ok(Json(records))
}

async fn search_product_name(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
) -> ApiResult<Vec<FormattedRecord>> {
    search(&state, FieldSelector::ProductName, &query).await
}

async fn search_product_brand(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
) -> ApiResult<Vec<FormattedRecord>> {
    search(&state, FieldSelector::ProductBrand, &query).await
}

async fn search_category_lv1(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
) -> ApiResult<Vec<FormattedRecord>> {
    search(&state, FieldSelector::SiteCategoryLv1, &query).await
}

async fn search_category_lv2(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
) -> ApiResult<Vec<FormattedRecord>> {
    search(&state, FieldSelector::SiteCategoryLv2, &query).await
}

async fn sentimentos(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ComentariosInput>,
) -> ApiResult<SentimentosResponse> {
    let results = fan_out(&payload.comentarios, state.config.agent.batch_concurrency, |comment| {
        state.sentiment.classify(comment)
    })
    .boxed()
    .await;

    let slots: Vec<BatchSlot<_>> = results
        .into_iter()
        .enumerate()
        .map(|(idx, result)| {
            if let Err(ref e) = result {
                tracing::warn!("Sentiment of comment {} failed: {}", idx, e);
            }
            BatchSlot::from(result)
        })
        .collect();

    let succeeded: Vec<_> = slots.iter().filter_map(BatchSlot::ok).collect();
    let geral = aggregate_share(&succeeded);

    Ok(Json(SentimentosResponse {
        sentimentos: slots,
        geral,
    }))
}

async fn gerador_topicos(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ComentariosInput>,
) -> ApiResult<TopicosResponse> {
    let results = fan_out(&payload.comentarios, state.config.agent.batch_concurrency, |comment| {
        state.topics.extract(comment)
    })
    .boxed()
    .await;

    let result = payload
        .comentarios
        .into_iter()
        .zip(results)
        .enumerate()
        .map(|(idx, (comentario, topics))| match topics {
            Ok(topics) => TopicResult {
                comentario,
                topicos_principais: Some(topics),
                erro: None,
            },
            Err(e) => {
                tracing::warn!("Topic extraction of comment {} failed: {}", idx, e);
                TopicResult {
                    comentario,
                    topicos_principais: None,
                    erro: Some(e.into_http().1),
                }
            }
        })
        .collect();

    Ok(Json(TopicosResponse { result }))
}

async fn sumarizacao(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ComentariosInput>,
) -> ApiResult<Summary> {
    let summary = state
        .summarizer
        .summarize(&payload.comentarios)
        .await
        .map_err(failure)?;
    Ok(Json(summary))
}

async fn chat(State(state): State<Arc<AppState>>, Json(body): Json<ChatBody>) -> ApiResult<ChatReply> {
    let thread_id = body
        .thread_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let turn = state.chat.turn(&thread_id, &body.message).await.map_err(failure)?;

    Ok(Json(ChatReply {
        resposta: turn.reply,
        intencao: turn.intent.name().to_string(),
        ferramentas: turn.tool_calls,
        thread_id: turn.thread_id,
    }))
}

fn parse_quantity(raw: &str) -> Result<usize> {
    let qtd: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ReviewError::Validation("qtd_comentario deve ser um número inteiro.".to_string()))?;
    if qtd <= 0 {
        return Err(ReviewError::Validation("qtd_comentario deve ser maior que zero.".to_string()));
    }
    Ok(qtd as usize)
}

async fn sentimento_geral(
    State(state): State<Arc<AppState>>,
    Path((search, query, qtd_comentario)): Path<(String, String, String)>,
) -> ApiResult<SentimentoGeralResponse> {
    let qtd = parse_quantity(&qtd_comentario).map_err(failure)?;
    let field: FieldSelector = search.parse().map_err(failure)?;
    let limit = qtd.min(state.config.agent.max_comments);

    let records = state.rag.search(field, &query, limit).await.map_err(failure)?;
    if records.is_empty() {
        return Ok(Json(SentimentoGeralResponse {
            total_comentarios: 0,
            falhas: 0,
            sentimentos: None,
            sumarizacao: None,
            mensagem: Some(not_found_message(field).to_string()),
        }));
    }

    let comments: Vec<ComentarioInput> = records.into_iter().map(ComentarioInput::from).collect();
    tracing::info!("Aggregating sentiment over {} comments for {} '{}'", comments.len(), field, query);

    let results = fan_out(&comments, state.config.agent.batch_concurrency, |comment| {
        state.sentiment.classify(comment)
    })
    .boxed()
    .await;

    let succeeded: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let falhas = results.len() - succeeded.len();
    if falhas > 0 {
        tracing::warn!("{} of {} sentiment classifications failed", falhas, results.len());
    }

    let summary = state.summarizer.summarize(&comments).await.map_err(failure)?;

    Ok(Json(SentimentoGeralResponse {
        total_comentarios: comments.len(),
        falhas,
        sentimentos: aggregate_share(&succeeded),
        sumarizacao: Some(summary),
        mensagem: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_must_be_a_positive_integer() {
        assert_eq!(parse_quantity("5").unwrap(), 5);
        assert!(matches!(parse_quantity("0"), Err(ReviewError::Validation(m)) if m.contains("maior que zero")));
        assert!(matches!(parse_quantity("-3"), Err(ReviewError::Validation(_))));
        assert!(matches!(parse_quantity("x"), Err(ReviewError::Validation(m)) if m.contains("inteiro")));
    }

    #[test]
    fn localhost_origins_are_allowed() {
        assert!(LOCALHOST_ORIGIN.is_match("http://localhost:3000"));
        assert!(LOCALHOST_ORIGIN.is_match("http://localhost"));
        assert!(!LOCALHOST_ORIGIN.is_match("http://localhost.evil.com"));
    }
}
