use crate::synthesis::GenerationRequest;
use crate::traits::Generator;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Chat-completions client for any OpenAI-compatible server (LM Studio,
/// llama.cpp server, Ollama, hosted APIs).
pub struct OpenAiCompatibleGenerator {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: Client,
}

impl OpenAiCompatibleGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                PipelineError::Synthesis(format!("http client setup failed: {error}"))
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
            temperature,
            max_tokens,
            client,
        })
    }

    fn chat_body(&self, request: &GenerationRequest) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt() },
                { "role": "user", "content": request.user_prompt() },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }
}

fn parse_completion(payload: &Value) -> Result<String, PipelineError> {
    if let Some(message) = payload.pointer("/error/message").and_then(Value::as_str) {
        return Err(PipelineError::Synthesis(format!("generation backend error: {message}")));
    }

    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| PipelineError::Synthesis("completion had no content".to_string()))
}

#[async_trait]
impl Generator for OpenAiCompatibleGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&self.chat_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|error| {
                PipelineError::Synthesis(format!("generation request failed: {error}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Synthesis(format!(
                "generation backend returned {status}: {text}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| {
                PipelineError::Synthesis(format!("invalid completion payload: {error}"))
            })?;

        parse_completion(&payload)
    }
}
