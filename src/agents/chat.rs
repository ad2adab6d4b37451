use std::sync::Arc;

use super::intent::{is_greeting, Intent, IntentClassifier};
use super::memory::ConversationStore;
use super::prompts::{CHAT_SYSTEM, CLARIFICATION_REPLY, GREETING_REPLY};
use crate::error::{Result, ReviewError};
use crate::llm::{ChatModel, CompletionRequest, Message, RetryPolicy};
use crate::models::ToolCall;
use crate::rag::RagEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingInput,
    GreetingResponse,
    ToolSelection,
    ToolCall,
    ResponseSynthesis,
    ClarificationRequest,
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub thread_id: String,
    pub intent: Intent,
    pub states: Vec<TurnState>,
    pub tool_calls: Vec<ToolCall>,
    pub reply: String,
}

/// Conversational agent: greeting, one retrieval tool, or a clarifying question per turn.
pub struct ChatAgent {
    model: Arc<dyn ChatModel>,
    retry: RetryPolicy,
    classifier: IntentClassifier,
    rag: RagEngine,
    memory: ConversationStore,
    tool_top_k: usize,
}

impl ChatAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        retry: RetryPolicy,
        rag: RagEngine,
        memory: ConversationStore,
        tool_top_k: usize,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(model.clone(), retry),
            model,
            retry,
            rag,
            memory,
            tool_top_k,
        }
    }

    pub fn memory(&self) -> &ConversationStore {
        &self.memory
    }

    pub async fn turn(&self, thread_id: &str, message: &str) -> Result<ChatTurn> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ReviewError::Validation("A mensagem não pode estar vazia.".to_string()));
        }

        // A greeting that opens a thread needs no memory.
        if is_greeting(message) && !self.memory.contains(thread_id).await {
            return Ok(ChatTurn {
                thread_id: thread_id.to_string(),
                intent: Intent::Greeting,
                states: vec![TurnState::AwaitingInput, TurnState::GreetingResponse, TurnState::AwaitingInput],
                tool_calls: Vec::new(),
                reply: GREETING_REPLY.to_string(),
            });
        }

        let mut conversation = self.memory.lock(thread_id).await;
        let mut states = vec![TurnState::AwaitingInput];
        let mut tool_calls = Vec::new();

        let intent = self.classifier.classify(conversation.history(), message).await?;

        let reply = match intent.tool() {
            None if intent == Intent::Greeting => {
                states.push(TurnState::GreetingResponse);
                GREETING_REPLY.to_string()
            }
            None => {
                states.push(TurnState::ClarificationRequest);
                CLARIFICATION_REPLY.to_string()
            }
            Some((tool, query)) => {
                states.push(TurnState::ToolSelection);
                tracing::debug!("Thread {} calls {}('{}')", thread_id, tool.name, query);

                states.push(TurnState::ToolCall);
                let (context, found) = self.rag.tool_context(tool.field, query, self.tool_top_k).await?;
                tool_calls.push(ToolCall {
                    ferramenta: tool.name.to_string(),
                    consulta: query.to_string(),
                    resultados: found,
                });

                states.push(TurnState::ResponseSynthesis);
                self.synthesize(conversation.history(), message, tool.name, &context).await?
            }
        };

        states.push(TurnState::AwaitingInput);
        conversation.record(Message::user(message), Message::assistant(reply.clone()));

        Ok(ChatTurn {
            thread_id: thread_id.to_string(),
            intent,
            states,
            tool_calls,
            reply,
        })
    }

    async fn synthesize(&self, history: &[Message], message: &str, tool: &str, context: &str) -> Result<String> {
        let mut messages = vec![Message::system(CHAT_SYSTEM)];
        messages.extend(history.iter().cloned());
        messages.push(Message::user(format!(
            "{}\n\nResultado da ferramenta {}:\n{}",
            message, tool, context
        )));
        let request = CompletionRequest::new(messages);

        self.retry
            .run("chat", || {
                let request = request.clone();
                async move {
                    let text = self.model.complete(request).await?;
                    let text = text.trim().to_string();
                    if text.is_empty() {
                        return Err(ReviewError::Upstream {
                            service: "llm".to_string(),
                            message: "resposta vazia".to_string(),
                        });
                    }
                    Ok(text)
                }
            })
            .await
    }
}
