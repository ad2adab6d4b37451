use std::sync::Arc;

use serde_json::json;

use super::prompts::{has_text, render_comment, TOPICS_SYSTEM};
use crate::error::{Result, ReviewError};
use crate::filters::TopicFilter;
use crate::llm::{parse_structured, ChatModel, CompletionRequest, Message, OutputSchema, RetryPolicy};
use crate::models::{ComentarioInput, Topics};

const SCHEMA_NAME: &str = "topicos";

fn schema() -> OutputSchema {
    OutputSchema {
        name: SCHEMA_NAME,
        schema: json!({
            "type": "object",
            "properties": {
                "topicos": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["topicos"],
            "additionalProperties": false
        }),
    }
}

/// Short aspect + judgement insights for one comment.
#[derive(Clone)]
pub struct TopicExtractor {
    model: Arc<dyn ChatModel>,
    retry: RetryPolicy,
}

impl TopicExtractor {
    pub fn new(model: Arc<dyn ChatModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    pub async fn extract(&self, comment: &ComentarioInput) -> Result<Vec<String>> {
        if !has_text(comment) {
            return Err(ReviewError::Validation("O comentário não possui texto para análise.".to_string()));
        }

        let request = CompletionRequest::new(vec![
            Message::system(TOPICS_SYSTEM),
            Message::user(render_comment(comment)),
        ])
        .with_schema(schema());

        let topics: Topics = self
            .retry
            .run(SCHEMA_NAME, || {
                let request = request.clone();
                async move {
                    let text = self.model.complete(request).await?;
                    parse_structured::<Topics>(SCHEMA_NAME, &text)
                }
            })
            .await?;

        let (kept, removed) = TopicFilter::clean(topics.topicos);
        if !removed.is_empty() {
            tracing::debug!("Dropped {} generic topics: {:?}", removed.len(), removed);
        }
        Ok(kept)
    }
}
