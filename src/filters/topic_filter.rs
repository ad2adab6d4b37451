use regex::Regex;
use once_cell::sync::Lazy;
use std::collections::HashSet;

// Model preambles that leak into the topic list
static PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:claro|certo|segue|seguem|aqui est[aã]o?|os principais t[oó]picos|t[oó]picos (?:principais|identificados|extra[ií]dos)|com base no coment[aá]rio|como (?:um )?assistente|espero ter ajudado|n[aã]o h[aá] t[oó]picos)\b").unwrap()
});

// Aspect names with no judgement attached
static GENERIC_TOPIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:a|o)\s+)?(?:qualidade(?:\s+do\s+produto)?|produto|entrega|atendimento|pre[cç]o|embalagem|usabilidade|funcionalidade|custo[- ]benef[ií]cio|geral|outros?|diversos|coment[aá]rio)$").unwrap()
});

// List markers and wrapping quotes
static DECORATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:[-*•]|\d+[.)])?\s*["'“”]?|["'“”]?\s*[.;,]?\s*$"#).unwrap()
});

pub struct TopicFilter;

impl TopicFilter {
    /// Cleans the topics returned by the model. Returns the kept topics in
    /// order and the ones that were dropped.
    pub fn clean(topics: Vec<String>) -> (Vec<String>, Vec<String>) {
        let mut kept = Vec::new();
        let mut removed = Vec::new();
        let mut seen = HashSet::new();

        for raw in topics {
            let topic = DECORATION.replace_all(raw.trim(), "").trim().to_string();

            if topic.is_empty()
                || PREAMBLE.is_match(&topic)
                || GENERIC_TOPIC.is_match(&topic)
                || !seen.insert(topic.to_lowercase())
            {
                removed.push(raw);
                continue;
            }

            kept.push(topic);
        }

        (kept, removed)
    }
}
