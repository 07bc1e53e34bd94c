//! OpenAI adapter (chat completions).
//!
//! Implements the core `CompletionClient` port used by AI-assisted clash solutions.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use cocbot_core::{clash::CompletionClient, errors::Error, Result};

const SYSTEM_PROMPT: &str =
    "You are a competitive programmer. Answer with a single complete program and nothing else.";

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client build");
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
            http,
        }
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(model = %self.model, prompt_len = prompt.len(), "requesting completion");

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| Error::External(format!("openai request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            warn!(status = status.as_u16(), %body, "openai completion failed");
            return Err(Error::External(format!(
                "openai completion failed: {status} {body}"
            )));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("openai json error: {e}")))?;

        message_content(&v)
    }
}

/// `choices[0].message.content` of a chat completion response.
fn message_content(v: &Value) -> Result<String> {
    let text = v
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or("");

    if text.trim().is_empty() {
        return Err(Error::External(
            "openai completion returned empty content".to_string(),
        ));
    }
    Ok(text.to_string())
}
