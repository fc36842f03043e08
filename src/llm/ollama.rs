//! Ollama `/api/chat` client
//!
//! Used when `LLM_PROVIDER=ollama`. Code is exchanged through fenced blocks
//! in the message text, so no tool definitions are sent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatError, ChatModel, GenerationParams, Message, Role};

/// A message in Ollama's chat format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Ollama role name; execution results go out as "tool"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool",
        };
        Self {
            role: role.to_string(),
            content: message.text.clone(),
        }
    }
}

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    #[serde(default)]
    pub eval_count: u32,
    #[serde(default)]
    pub eval_duration: u64,
}

/// Client for Ollama's /api/chat endpoint
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    system_prompt: String,
    params: GenerationParams,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new chat client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    /// * `model` - The model name (e.g., "qwen3")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            system_prompt: super::DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            params: GenerationParams::default(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    fn request_body(&self, history: &[Message]) -> serde_json::Value {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(history.iter().map(ChatMessage::from));

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": self.params.temperature,
                "top_p": self.params.top_p,
                "top_k": self.params.top_k,
                "num_predict": self.params.max_output_tokens
            }
        })
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, history: &[Message]) -> Result<String, ChatError> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let body = self.request_body(history);

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                message: text,
            });
        }
        if text.is_empty() {
            return Err(ChatError::EmptyResponse(None));
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)?;
        debug!(
            eval_count = chat_response.eval_count,
            eval_duration_ns = chat_response.eval_duration,
            "Ollama response received"
        );
        if chat_response.message.content.trim().is_empty() {
            return Err(ChatError::EmptyResponse(None));
        }
        Ok(chat_response.message.content)
    }
}
