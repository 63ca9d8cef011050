use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use kbase_core::config::CompletionSettings;
use kbase_core::error::{Error, Result};
use kbase_core::traits::Completer;
use kbase_core::types::CompletionPrompt;

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

/// Client for an OpenAI-compatible chat completions endpoint.
///
/// Returns the raw message content; parsing and validation happen downstream.
pub struct HttpCompleter {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl HttpCompleter {
    pub fn new(settings: &CompletionSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn request_body<'a>(&'a self, prompt: &'a CompletionPrompt) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                Message { role: "system", content: &prompt.system },
                Message { role: "user", content: &prompt.user },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        }
    }
}

#[async_trait]
impl Completer for HttpCompleter {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &CompletionPrompt) -> Result<String> {
        let mut req = self.client.post(self.endpoint()).json(&self.request_body(prompt));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| Error::Service(format!("completion request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(Error::from_http_status("completion", status.as_u16(), &detail));
        }
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Service(format!("unexpected completion response: {e}")))?;

        // choices[0].message.content may be null; the validator treats empty text as unparseable
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .unwrap_or("")
            .to_string();
        debug!(model = %self.model, chars = content.len(), "completion received");
        Ok(content)
    }
}
