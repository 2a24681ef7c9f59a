// crates/engine/src/summarizer.rs
use async_trait::async_trait;
use common::config::SummarizerSection;
use common::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

const SYSTEM_PROMPT: &str = "You are a precise news aggregator for crypto assets. Analyse the given \
evidence and answer with one JSON object with keys: symbol, sentiment (bullish|bearish|neutral), \
score (0-1), confidence (0-1), rationale (2-4 sentences), top_signals (array of {source, evidence}).";

/// Refinement returned by a summarizer. Every structured field is optional
/// and only overrides the heuristic value when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub rationale: String,
    pub sentiment: Option<Sentiment>,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
}

/// External summarization collaborator
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, symbol: &str, signals: &[TopSignal]) -> Result<Summary>;
}

fn strip_fences(raw: &str) -> String {
    let mut text = raw.trim().to_string();
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let lang_len = after
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_alphabetic())
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);
        if after[..lang_len].eq_ignore_ascii_case("json") {
            text = format!("{}{}", &text[..start], &after[lang_len..]);
        }
    }
    text.replace("```", "").trim().to_string()
}

fn unit_number(value: Option<&Value>) -> Option<f64> {
    value
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .map(clamp01)
}

/// Tolerant parse of a model answer.
///
/// Fences are stripped and the outermost `{...}` decoded; each field is
/// validated on its own. Anything unusable leaves the cleaned raw text as
/// the rationale.
pub fn parse_summary(raw: &str) -> Summary {
    let text = strip_fences(raw);

    let candidate = match (text.find('{'), text.rfind('}')) {
        (Some(first), Some(last)) if last > first => &text[first..=last],
        _ => text.as_str(),
    };

    let object = match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => map,
        _ => {
            return Summary {
                rationale: text,
                ..Default::default()
            };
        }
    };

    let rationale = object
        .get("rationale")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| text.clone());

    Summary {
        rationale,
        sentiment: object.get("sentiment").and_then(Value::as_str).and_then(Sentiment::parse),
        score: unit_number(object.get("score")),
        confidence: unit_number(object.get("confidence")),
    }
}

pub fn build_user_prompt(signals: &[TopSignal]) -> String {
    let evidence = signals
        .iter()
        .map(|s| format!("{}: {}", s.source, s.evidence.split_whitespace().collect::<Vec<_>>().join(" ")))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Write a short summary per asset based on these top signals: [{}]. Return plain JSON without extra explanation.",
        evidence
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatReply>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client
pub struct ChatSummarizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatSummarizer {
    pub fn new(section: &SummarizerSection, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", section.api_base.trim_end_matches('/')),
            api_key,
            model: section.model.clone(),
            temperature: section.temperature,
            max_tokens: section.max_tokens,
        })
    }

    /// `None` when the section is absent or the key variable is unset.
    pub fn from_config(section: Option<&SummarizerSection>) -> Result<Option<Self>> {
        let Some(section) = section else {
            return Ok(None);
        };

        match std::env::var(&section.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(Self::new(section, key)?)),
            _ => {
                tracing::warn!(
                    "Summarizer configured but {} is not set; running heuristic-only",
                    section.api_key_env
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, symbol: &str, signals: &[TopSignal]) -> Result<Summary> {
        let start = Instant::now();

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_user_prompt(signals),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Summarizer(e.to_string()))?;

        let body: ChatResponse = resp.json().await?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Summarizer(format!("empty completion for {}", symbol)))?;

        tracing::debug!(
            "Summarizer answered for {} in {:.2}s ({} chars)",
            symbol,
            start.elapsed().as_secs_f32(),
            content.len()
        );

        Ok(parse_summary(&content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"sentiment\":\"bullish\",\"score\":0.72,\"confidence\":0.6,\"rationale\":\"ETF inflows dominate.\"}\n```";
        let summary = parse_summary(raw);
        assert_eq!(summary.sentiment, Some(Sentiment::Bullish));
        assert_eq!(summary.score, Some(0.72));
        assert_eq!(summary.confidence, Some(0.6));
        assert_eq!(summary.rationale, "ETF inflows dominate.");
    }

    #[test]
    fn test_parse_json_with_prose_around() {
        let raw = "Here you go: {\"symbol\":\"BTC\",\"rationale\":\"Calm.\",\"score\":1.7} hope it helps";
        let summary = parse_summary(raw);
        assert_eq!(summary.rationale, "Calm.");
        assert_eq!(summary.score, Some(1.0));
        assert_eq!(summary.sentiment, None);
    }

    #[test]
    fn test_fields_validated_independently() {
        let raw = r#"{"sentiment":"moon","score":"high","confidence":0.4}"#;
        let summary = parse_summary(raw);
        assert_eq!(summary.sentiment, None);
        assert_eq!(summary.score, None);
        assert_eq!(summary.confidence, Some(0.4));
        assert_eq!(summary.rationale, raw);
    }

    #[test]
    fn test_broken_json_falls_back_to_text() {
        let summary = parse_summary("```\n{\"rationale\": \"cut off\n```");
        assert_eq!(summary.rationale, "{\"rationale\": \"cut off");
        assert_eq!(summary, Summary {
            rationale: "{\"rationale\": \"cut off".to_string(),
            ..Default::default()
        });

        let plain = parse_summary("Market looks calm overall.");
        assert_eq!(plain.rationale, "Market looks calm overall.");
    }

    #[test]
    fn test_user_prompt_collapses_whitespace() {
        let prompt = build_user_prompt(&[TopSignal {
            source: "news".to_string(),
            evidence: "ETF\n  inflows   rise".to_string(),
        }]);
        assert!(prompt.contains("[news: ETF inflows rise]"));
    }

    #[test]
    fn test_missing_key_means_not_configured() {
        let section = SummarizerSection {
            api_key_env: "SENTIMENT_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        };
        assert!(ChatSummarizer::from_config(Some(&section)).unwrap().is_none());
        assert!(ChatSummarizer::from_config(None).unwrap().is_none());
    }
}
