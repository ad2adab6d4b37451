use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::{Result, ReviewError};

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").unwrap());

/// Parses a model answer into `T`. Accepts bare JSON, a fenced code block, or
/// a JSON object surrounded by prose.
pub fn parse_structured<T: DeserializeOwned>(schema: &str, text: &str) -> Result<T> {
    let text = text.trim();
    let mut last_error = match serde_json::from_str::<T>(text) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };

    let mut candidates: Vec<&str> = FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
        .collect();

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            candidates.push(&text[start..=end]);
        }
    }

    for candidate in candidates {
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = e.to_string(),
        }
    }

    tracing::debug!("Unparseable {} output: {}", schema, text);
    Err(ReviewError::StructuredOutputParse {
        schema: schema.to_string(),
        reason: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Topics;

    #[test]
    fn bare_json() {
        let topics: Topics = parse_structured("topicos", r#"{"topicos": ["entrega rápida"]}"#).unwrap();
        assert_eq!(topics.topicos, vec!["entrega rápida"]);
    }

    #[test]
    fn fenced_json() {
        let text = "Aqui está:\n```json\n{\"topicos\": [\"bateria fraca\"]}\n```\n";
        let topics: Topics = parse_structured("topicos", text).unwrap();
        assert_eq!(topics.topicos, vec!["bateria fraca"]);
    }

    #[test]
    fn object_inside_prose() {
        let text = "Claro! {\"topics\": [\"preço justo\"]} Espero ter ajudado.";
        let topics: Topics = parse_structured("topicos", text).unwrap();
        assert_eq!(topics.topicos, vec!["preço justo"]);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_structured::<Topics>("topicos", "não sei").unwrap_err();
        assert!(matches!(err, ReviewError::StructuredOutputParse { ref schema, .. } if schema == "topicos"));
        assert!(err.is_retryable());
    }
}
