use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use super::rate_limit::{is_rate_limited, rate_limit_error, retry_after};
use crate::client::{TranslateFuture, TranslationClient};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Chat-completions backed translator. One request per call; retries are
/// left to the dispatcher, which also honors `Retry-After` on rate limits.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim().trim_end_matches('/');
        if !base_url.is_empty() {
            self.base_url = base_url.to_string();
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, text: &str, requester_id: &str, language: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = request_body(&self.model, text, requester_id, language);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", url))?;

        let status = response.status();
        let wait = retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            return extract_completion(&text);
        }
        if is_rate_limited(status, &text) {
            return Err(rate_limit_error("OpenAI", status, wait).into());
        }
        Err(anyhow!(
            "OpenAI API error ({}): {}",
            status,
            extract_openai_error(&text).unwrap_or(text)
        ))
    }
}

impl TranslationClient for OpenAiClient {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        requester_id: &'a str,
        language: &'a str,
    ) -> TranslateFuture<'a> {
        Box::pin(self.complete(text, requester_id, language))
    }
}

fn system_prompt(language: &str) -> String {
    format!(
        "Translate the user's message into {}. Reply with the translation only, \
         keeping formatting, mentions and links intact.",
        language
    )
}

fn request_body(model: &str, text: &str, requester_id: &str, language: &str) -> Value {
    let mut body = json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system_prompt(language)},
            {"role": "user", "content": text}
        ]
    });
    if !requester_id.trim().is_empty() {
        body["user"] = json!(requester_id);
    }
    body
}

fn extract_completion(text: &str) -> Result<String> {
    let payload: ChatResponse =
        serde_json::from_str(text).with_context(|| "failed to parse OpenAI response JSON")?;
    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();
    if content.is_empty() {
        return Err(anyhow!("OpenAI returned an empty completion"));
    }
    Ok(content)
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let parts = [error.message, error.kind.map(|kind| format!("type: {}", kind))]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
