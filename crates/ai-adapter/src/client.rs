//! Thin HTTP client for the Gemini `generateContent` endpoint.

use crate::error::{AiAdapterError, AiAdapterResult};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>, max_tokens: u32) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build Gemini HTTP client");
        Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            max_tokens,
        }
    }

    /// Sends `prompt` as the sole user turn and returns the first candidate's text.
    pub async fn generate(&self, prompt: &str, temperature: f64) -> AiAdapterResult<String> {
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, self.model, self.api_key);
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": self.max_tokens,
                "responseMimeType": "application/json",
            },
        });

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AiAdapterError::Http { status: status.as_u16(), body: text });
        }

        let payload: Value = resp.json().await?;
        let candidates = payload.get("candidates").and_then(|v| v.as_array()).ok_or(AiAdapterError::NoCandidates)?;
        let first = candidates.first().ok_or(AiAdapterError::NoCandidates)?;
        let text = first
            .pointer("/content/parts/0/text")
            .and_then(|v| v.as_str())
            .ok_or(AiAdapterError::NoTextPart)?;
        Ok(text.to_string())
    }
}
