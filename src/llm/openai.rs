//! OpenAI-compatible chat client (OpenAI, DeepSeek, vLLM, Ollama, ...).

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

use super::{ChatClient, ChatPurpose, ChatResult};
use crate::config::LlmSettings;

const SUMMARY_MAX_TOKENS: u32 = 300;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited by provider")]
    RateLimited,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unparseable response: {0}")]
    Parse(String),
}

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    translation_model: String,
    max_tokens: u32,
    translation_max_tokens: u32,
    temperature: f32,
}

impl OpenAiClient {
    pub fn from_settings(s: &LlmSettings) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(s.timeout_secs))
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            base_url: s.base_url.trim_end_matches('/').to_string(),
            api_key: s.api_key.clone().filter(|k| !k.is_empty()),
            model: s.model.clone(),
            translation_model: s.translation_model.clone(),
            max_tokens: s.max_tokens,
            translation_max_tokens: s.translation_max_tokens,
            temperature: s.temperature,
        })
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn model_and_budget(&self, purpose: ChatPurpose) -> (&str, u32) {
        match purpose {
            ChatPurpose::Translation => (&self.translation_model, self.translation_max_tokens),
            ChatPurpose::Summary => (&self.model, self.max_tokens.min(SUMMARY_MAX_TOKENS)),
            ChatPurpose::General => (&self.model, self.max_tokens),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageResponse>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    total_tokens: u32,
}

fn parse_response(resp: ChatResponse) -> Result<ChatResult, LlmError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Parse("no choices in response".to_string()))?;
    Ok(ChatResult {
        text: choice.message.content.unwrap_or_default(),
        truncated: choice.finish_reason.as_deref() == Some("length"),
    })
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn chat_ext(
        &self,
        system: &str,
        user: &str,
        purpose: ChatPurpose,
    ) -> anyhow::Result<ChatResult> {
        let (model, max_tokens) = self.model_and_budget(purpose);
        tracing::info!(
            model,
            max_tokens,
            sys_len = system.len(),
            user_len = user.len(),
            "chat request"
        );

        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let mut req = self.client.post(self.chat_completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }
        let response = req
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimited.into());
            }
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let total_tokens = parsed.usage.as_ref().map(|u| u.total_tokens);
        let result = parse_response(parsed)?;
        tracing::info!(
            len = result.text.len(),
            truncated = result.truncated,
            total_tokens = ?total_tokens,
            "chat response"
        );
        Ok(result)
    }
}
