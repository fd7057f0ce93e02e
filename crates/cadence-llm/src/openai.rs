use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cadence_core::config::ClassifierConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::IntentClassifier;
use cadence_core::types::{DateRangeHint, IntentClassification, ParsedTime};

use crate::prompts;

/// Classifier backed by any OpenAI-compatible chat completions endpoint.
pub struct OpenAiClassifier {
    http: Client,
    config: ClassifierConfig,
}

impl OpenAiClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
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

/// Parse model output as JSON, tolerating a surrounding code fence.
pub(crate) fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).map_err(|e| {
        CadenceError::ClassifierParse(format!("{}: {}", e, truncate(body, 120)))
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

impl OpenAiClassifier {
    async fn complete<T: DeserializeOwned>(&self, system: &str, user: &str) -> Result<T> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                OaiMessage {
                    role: "system",
                    content: system,
                },
                OaiMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            response_format: ResponseFormat {
                r#type: "json_object",
            },
        };

        let mut req = self.http.post(&url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| CadenceError::Classifier(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(CadenceError::Classifier(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CadenceError::ClassifierParse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CadenceError::ClassifierParse("empty completion".into()))?;

        debug!(model = %self.config.model, len = content.len(), "Classifier responded");
        parse_json(&content)
    }
}

#[derive(Deserialize)]
struct RawParsedTime {
    start: DateTime<Utc>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    display: Option<String>,
}

impl IntentClassifier for OpenAiClassifier {
    fn classify_intent<'a>(
        &'a self,
        reply_text: &'a str,
    ) -> BoxFuture<'a, Result<IntentClassification>> {
        Box::pin(async move { self.complete(prompts::CLASSIFY_INTENT, reply_text).await })
    }

    fn extract_date_range<'a>(&'a self, phrase: &'a str) -> BoxFuture<'a, Result<DateRangeHint>> {
        Box::pin(async move {
            let hint: DateRangeHint = self.complete(prompts::EXTRACT_DATE_RANGE, phrase).await?;
            if hint.range_label.trim().is_empty() {
                return Err(CadenceError::ClassifierParse("empty range_label".into()));
            }
            Ok(hint)
        })
    }

    fn parse_time<'a>(
        &'a self,
        phrase: &'a str,
        reference: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<ParsedTime>> {
        Box::pin(async move {
            let system = prompts::parse_time(&reference.to_rfc3339());
            let raw: RawParsedTime = self.complete(&system, phrase).await?;
            let end = raw.end.unwrap_or(raw.start + chrono::Duration::minutes(30));
            if end <= raw.start {
                return Err(CadenceError::ClassifierParse("end before start".into()));
            }
            Ok(ParsedTime {
                start: raw.start,
                end,
                display: raw
                    .display
                    .unwrap_or_else(|| raw.start.format("%A, %B %-d at %-I:%M %p UTC").to_string()),
            })
        })
    }
}
