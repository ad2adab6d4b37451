use std::path::PathBuf;
use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("nenhum resultado encontrado para '{0}'")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("model output does not match schema '{schema}': {reason}")]
    StructuredOutputParse { schema: String, reason: String },

    #[error("{service} did not answer within {elapsed:?}")]
    UpstreamTimeout { service: String, elapsed: Duration },

    #[error("{service} request failed: {message}")]
    Upstream { service: String, message: String },

    #[error("no indexable values for field '{0}'")]
    EmptyCorpus(String),

    #[error("dataset file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("dataset file is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<ReviewError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReviewError>;

impl From<config::ConfigError> for ReviewError {
    fn from(e: config::ConfigError) -> Self {
        ReviewError::Config(e.to_string())
    }
}

impl ReviewError {
    /// Errors worth another attempt under a [`crate::llm::RetryPolicy`].
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReviewError::StructuredOutputParse { .. }
                | ReviewError::UpstreamTimeout { .. }
                | ReviewError::Upstream { .. }
        )
    }

    /// "Nothing there" conditions that callers render as an empty result.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReviewError::NotFound(_) | ReviewError::EmptyCorpus(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ReviewError::Validation(_) => StatusCode::BAD_REQUEST,
            ReviewError::NotFound(_) | ReviewError::EmptyCorpus(_) => StatusCode::NOT_FOUND,
            ReviewError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ReviewError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ReviewError::RetriesExhausted { source, .. } => match source.status_code() {
                StatusCode::GATEWAY_TIMEOUT => StatusCode::GATEWAY_TIMEOUT,
                StatusCode::BAD_GATEWAY => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Status and client-facing message. Model parse failures are reported
    /// generically; the detail stays in the logs.
    pub fn into_http(self) -> (StatusCode, String) {
        let status = self.status_code();
        let message = match &self {
            ReviewError::StructuredOutputParse { .. } => {
                "Não foi possível interpretar a resposta do modelo.".to_string()
            }
            ReviewError::RetriesExhausted { source, .. }
                if matches!(**source, ReviewError::StructuredOutputParse { .. }) =>
            {
                "Não foi possível interpretar a resposta do modelo.".to_string()
            }
            _ => self.to_string(),
        };
        (status, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let (status, message) =
            ReviewError::Validation("qtd_comentario deve ser maior que zero.".into()).into_http();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "qtd_comentario deve ser maior que zero.");
    }

    #[test]
    fn exhausted_timeouts_stay_gateway_timeouts() {
        let err = ReviewError::RetriesExhausted {
            operation: "sentimento".into(),
            attempts: 5,
            source: Box::new(ReviewError::UpstreamTimeout {
                service: "llm".into(),
                elapsed: Duration::from_secs(30),
            }),
        };
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn parse_failures_hide_model_output() {
        let err = ReviewError::StructuredOutputParse {
            schema: "topicos".into(),
            reason: "expected value at line 1".into(),
        };
        let (status, message) = err.into_http();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("line 1"));
    }

    #[test]
    fn retryable_classification() {
        assert!(ReviewError::Upstream { service: "llm".into(), message: "503".into() }.is_retryable());
        assert!(!ReviewError::Validation("x".into()).is_retryable());
        assert!(ReviewError::EmptyCorpus("product_name".into()).is_not_found());
    }
}
