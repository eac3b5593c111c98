use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_MAX_TOKENS: u32 = 500;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Generates one answer from a system prompt and the user's question.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_message: &str)
        -> Result<String, BackendError>;
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for Arc<T> {
    async fn generate(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, BackendError> {
        (**self).generate(system_prompt, user_message).await
    }
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatModel {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    client: Client,
}

impl OpenAiChatModel {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            model: model.into(),
            api_key,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            client: Client::new(),
        }
    }

    pub fn with_generation_limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn generate(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, BackendError> {
        let payload = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "chat".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| BackendError::BackendResponse {
                backend: "chat".to_string(),
                details: "response contained no completion text".to_string(),
            })
    }
}
