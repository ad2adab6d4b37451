use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ChatModel, CompletionRequest, Message};
use crate::config::LlmConfig;
use crate::error::{Result, ReviewError};
use crate::rag::embeddings::upstream_error;

const SERVICE: &str = "llm";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client (Ollama, LiteLLM, vLLM...).
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &LlmConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReviewError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout,
        })
    }

    pub async fn chat_completion(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let response_format = request.schema.as_ref().map(|s| {
            json!({
                "type": "json_schema",
                "json_schema": { "name": s.name, "schema": s.schema, "strict": true }
            })
        });

        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature.unwrap_or(self.temperature),
            response_format,
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| upstream_error(SERVICE, e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ReviewError::Upstream {
                service: SERVICE.to_string(),
                message: format!("{} - {}", status, error_text),
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| upstream_error(SERVICE, e, self.timeout))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ReviewError::Upstream {
                service: SERVICE.to_string(),
                message: "response has no content".to_string(),
            })
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.chat_completion(&request).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        let mut req = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        match req.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!("LLM health check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::OutputSchema;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            api_key: api_key.map(str::to_string),
            model: "mistral".to_string(),
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn sends_schema_and_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "model": "mistral",
                "response_format": { "type": "json_schema", "json_schema": { "name": "topicos" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"topicos\": []}" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(&server.uri(), Some("secret")), Duration::from_secs(5)).unwrap();
        let request = CompletionRequest::new(vec![Message::user("oi")]).with_schema(OutputSchema {
            name: "topicos",
            schema: json!({ "type": "object" }),
        });

        assert_eq!(client.complete(request).await.unwrap(), "{\"topicos\": []}");
    }

    #[tokio::test]
    async fn server_errors_are_upstream_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(&server.uri(), None), Duration::from_secs(5)).unwrap();
        let err = client
            .complete(CompletionRequest::new(vec![Message::user("oi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Upstream { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn slow_server_is_a_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(&server.uri(), None), Duration::from_millis(50)).unwrap();
        let err = client
            .complete(CompletionRequest::new(vec![Message::user("oi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::UpstreamTimeout { .. }));
    }

    #[tokio::test]
    async fn health_check_hits_models_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(&server.uri(), None), Duration::from_secs(5)).unwrap();
        assert!(client.health_check().await);
    }
}
