use std::sync::Arc;

use serde_json::json;
use tiktoken_rs::CoreBPE;

use super::prompts::{has_text, render_comment, SUMMARY_SYSTEM};
use crate::error::{Result, ReviewError};
use crate::llm::{parse_structured, ChatModel, CompletionRequest, Message, OutputSchema, RetryPolicy};
use crate::models::{ComentarioInput, Summary};

const SCHEMA_NAME: &str = "resumo";
const SEPARATOR: &str = "\n\n---\n\n";

fn schema() -> OutputSchema {
    OutputSchema {
        name: SCHEMA_NAME,
        schema: json!({
            "type": "object",
            "properties": { "resumo": { "type": "string" } },
            "required": ["resumo"],
            "additionalProperties": false
        }),
    }
}

/// Strategic paragraph over a batch of comments about the same subject.
#[derive(Clone)]
pub struct Summarizer {
    model: Arc<dyn ChatModel>,
    retry: RetryPolicy,
    bpe: Arc<CoreBPE>,
    token_budget: usize,
}

impl Summarizer {
    pub fn new(model: Arc<dyn ChatModel>, retry: RetryPolicy, token_budget: usize) -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| ReviewError::Config(format!("tokenizer: {}", e)))?;
        Ok(Self {
            model,
            retry,
            bpe: Arc::new(bpe),
            token_budget,
        })
    }

    /// Renders comments until the token budget is spent. Returns the prompt
    /// body and how many comments made it in.
    pub fn pack(&self, comments: &[ComentarioInput]) -> (String, usize) {
        let separator_tokens = self.bpe.encode_with_special_tokens(SEPARATOR).len();
        let mut used = 0usize;
        let mut blocks = Vec::new();

        for comment in comments.iter().filter(|c| has_text(c)) {
            let block = render_comment(comment);
            let cost = self.bpe.encode_with_special_tokens(&block).len() + separator_tokens;
            if !blocks.is_empty() && used + cost > self.token_budget {
                break;
            }
            used += cost;
            blocks.push(block);
        }

        let count = blocks.len();
        (blocks.join(SEPARATOR), count)
    }

    pub async fn summarize(&self, comments: &[ComentarioInput]) -> Result<Summary> {
        let (body, included) = self.pack(comments);
        if included == 0 {
            return Err(ReviewError::Validation("A lista de comentários está vazia.".to_string()));
        }
        if included < comments.len() {
            tracing::debug!("Summarizing {} of {} comments (token budget {})", included, comments.len(), self.token_budget);
        }

        let request = CompletionRequest::new(vec![
            Message::system(SUMMARY_SYSTEM),
            Message::user(format!("Comentários para analisar:\n\n{}", body)),
        ])
        .with_schema(schema());

        self.retry
            .run(SCHEMA_NAME, || {
                let request = request.clone();
                async move {
                    let text = self.model.complete(request).await?;
                    let summary = parse_structured::<Summary>(SCHEMA_NAME, &text)?;
                    if summary.resumo.trim().is_empty() {
                        return Err(ReviewError::StructuredOutputParse {
                            schema: SCHEMA_NAME.to_string(),
                            reason: "resumo vazio".to_string(),
                        });
                    }
                    Ok(summary)
                }
            })
            .await
    }
}
