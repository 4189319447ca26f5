use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{AiProvider, AppConfig};
use crate::error::CompletionError;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String, // "system", "user" or "assistant"
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A language-model text completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, CompletionError>;
}

pub fn client_from_config(config: &AppConfig) -> Arc<dyn CompletionClient> {
    match config.ai_provider {
        AiProvider::OpenAI => Arc::new(OpenAiClient::new(
            config.ai_base_url(),
            &config.ai_model,
            config.api_key.clone(),
        )),
        AiProvider::Ollama => Arc::new(OllamaClient::new(config.ai_base_url(), &config.ai_model)),
    }
}

/// OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, CompletionError> {
        #[derive(Serialize)]
        struct ChatCompletionRequest<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            temperature: f32,
            max_tokens: u32,
        }

        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: Option<String>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }

        #[derive(Deserialize)]
        struct ChatCompletionResponse {
            choices: Vec<Choice>,
        }

        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CompletionError::MissingApiKey("OpenAI"))?;

        let url = format!("{}/chat/completions", self.base_url);
        let request_body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens,
        };

        tracing::debug!(
            "[Completion] OpenAI request: {} messages, max_tokens={}",
            messages.len(),
            max_tokens
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api {
                provider: "OpenAI",
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(CompletionError::EmptyResponse("OpenAI"))
    }
}

/// Local Ollama `/api/chat` endpoint.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl CompletionClient for OllamaClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, CompletionError> {
        #[derive(Serialize)]
        struct Options {
            num_predict: u32,
            temperature: f32,
        }

        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            stream: bool,
            options: Options,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            message: ChatMessage,
        }

        let url = format!("{}/api/chat", self.base_url);
        let request_body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: Options {
                num_predict: max_tokens,
                temperature,
            },
        };

        let response = self.client.post(&url).json(&request_body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api {
                provider: "Ollama",
                status: status.as_u16(),
                body,
            });
        }

        let chat_response: ChatResponse = response.json().await?;
        Ok(chat_response.message.content)
    }
}
