use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;

use super::prompts::{has_text, render_comment, SENTIMENT_SYSTEM};
use crate::error::{Result, ReviewError};
use crate::llm::{parse_structured, ChatModel, CompletionRequest, Message, OutputSchema, RetryPolicy};
use crate::models::{ComentarioInput, SentimentBreakdown, SentimentLabel, SentimentShare, TopicSentiment};

const SCHEMA_NAME: &str = "sentimento";

fn schema() -> OutputSchema {
    let label = json!({ "type": "string", "enum": ["POSITIVO", "NEGATIVO", "NEUTRO"] });
    OutputSchema {
        name: SCHEMA_NAME,
        schema: json!({
            "type": "object",
            "properties": {
                "sentimento": label,
                "topicos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "topico": { "type": "string" },
                            "sentimento": label,
                            "justificativa": { "type": "string" }
                        },
                        "required": ["topico", "sentimento", "justificativa"],
                        "additionalProperties": false
                    }
                },
                "incoerencia": { "type": "boolean" }
            },
            "required": ["sentimento", "topicos", "incoerencia"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ModelVerdict {
    sentimento: SentimentLabel,
    #[serde(default)]
    topicos: Vec<TopicSentiment>,
    #[serde(default, alias = "incoerente")]
    incoerencia: bool,
}

/// Text sentiment that contradicts the numeric rating.
pub fn rating_conflicts(label: SentimentLabel, rating: i64) -> bool {
    match label {
        SentimentLabel::Negativo => rating >= 4,
        SentimentLabel::Positivo => rating <= 2,
        SentimentLabel::Neutro => false,
    }
}

/// Runs `f` over `items` with at most `concurrency` in flight. Results come
/// back in input order.
pub async fn fan_out<I, T, F, Fut>(items: I, concurrency: usize, f: F) -> Vec<Result<T>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    stream::iter(items)
        .map(f)
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Aggregate split over the successful classifications of a batch.
pub fn aggregate_share(breakdowns: &[&SentimentBreakdown]) -> Option<SentimentShare> {
    if breakdowns.is_empty() {
        return None;
    }
    let labels: Vec<SentimentLabel> = breakdowns.iter().map(|b| b.sentimento).collect();
    Some(SentimentShare::from_labels(&labels))
}

#[derive(Clone)]
pub struct SentimentClassifier {
    model: Arc<dyn ChatModel>,
    retry: RetryPolicy,
}

impl SentimentClassifier {
    pub fn new(model: Arc<dyn ChatModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    pub async fn classify(&self, comment: &ComentarioInput) -> Result<SentimentBreakdown> {
        if !has_text(comment) {
            return Err(ReviewError::Validation("O comentário não possui texto para análise.".to_string()));
        }

        let request = CompletionRequest::new(vec![
            Message::system(SENTIMENT_SYSTEM),
            Message::user(render_comment(comment)),
        ])
        .with_schema(schema());

        let verdict: ModelVerdict = self
            .retry
            .run(SCHEMA_NAME, || {
                let request = request.clone();
                async move {
                    let text = self.model.complete(request).await?;
                    parse_structured::<ModelVerdict>(SCHEMA_NAME, &text)
                }
            })
            .await?;

        let incoerencia = verdict.incoerencia || rating_conflicts(verdict.sentimento, comment.avaliacao_geral);

        // Per-comment split is over the topic sentiments; a comment without
        // topics counts as its overall label.
        let labels: Vec<SentimentLabel> = if verdict.topicos.is_empty() {
            vec![verdict.sentimento]
        } else {
            verdict.topicos.iter().map(|t| t.sentimento).collect()
        };

        Ok(SentimentBreakdown {
            sentimento: verdict.sentimento,
            percentuais: SentimentShare::from_labels(&labels),
            topicos: verdict.topicos,
            incoerencia,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{fast_retry, ScriptedModel};

    fn comment(rating: i64, text: &str) -> ComentarioInput {
        serde_json::from_value(json!({ "Avaliação Geral": rating, "Comentário": text })).unwrap()
    }

    #[tokio::test]
    async fn rating_conflict_sets_incoherence() {
        let model = Arc::new(ScriptedModel::new(|_| {
            Ok(r#"{"sentimento": "POSITIVO", "topicos": [
                {"topico": "entrega", "sentimento": "POSITIVO", "justificativa": "rápida"},
                {"topico": "preço", "sentimento": "NEGATIVO", "justificativa": "caro"}
            ], "incoerencia": false}"#
                .to_string())
        }));
        let classifier = SentimentClassifier::new(model, fast_retry());
        let breakdown = classifier.classify(&comment(1, "Ótimo produto")).await.unwrap();

        assert_eq!(breakdown.sentimento, SentimentLabel::Positivo);
        assert!(breakdown.incoerencia);
        assert_eq!(breakdown.topicos.len(), 2);
        assert_eq!(breakdown.percentuais.total(), 100);
        assert_eq!(breakdown.percentuais.positivos, 50);
    }

    #[tokio::test]
    async fn model_flag_is_kept() {
        let model = Arc::new(ScriptedModel::new(|_| {
            Ok(r#"{"sentimento": "NEUTRO", "topicos": [], "incoerencia": true}"#.to_string())
        }));
        let classifier = SentimentClassifier::new(model, fast_retry());
        let breakdown = classifier.classify(&comment(3, "ok")).await.unwrap();
        assert!(breakdown.incoerencia);
        assert_eq!(breakdown.percentuais.neutros, 100);
    }

    #[test]
    fn conflicts_follow_rating_bands() {
        assert!(rating_conflicts(SentimentLabel::Negativo, 5));
        assert!(rating_conflicts(SentimentLabel::Positivo, 1));
        assert!(!rating_conflicts(SentimentLabel::Positivo, 3));
        assert!(!rating_conflicts(SentimentLabel::Neutro, 1));
        assert!(!rating_conflicts(SentimentLabel::Negativo, 2));
    }

    #[tokio::test]
    async fn fan_out_keeps_input_order() {
        let results = fan_out(vec![30u64, 0, 15, 5], 4, |delay| async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            if delay == 15 {
                Err(ReviewError::Validation("falhou".into()))
            } else {
                Ok(delay)
            }
        })
        .await;

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().ok(), Some(&30));
        assert_eq!(results[1].as_ref().ok(), Some(&0));
        assert!(results[2].is_err());
        assert_eq!(results[3].as_ref().ok(), Some(&5));
    }

    #[test]
    fn aggregate_of_nothing_is_none() {
        assert!(aggregate_share(&[]).is_none());
    }
}
