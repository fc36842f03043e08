//! Hosted language model access
//!
//! The conversation loop only sees the [`ChatModel`] trait: ordered history
//! in, one text completion out. Two services sit behind it:
//!
//! - [`VertexClient`] - Gemini on Vertex AI (`:generateContent`)
//! - [`OllamaClient`] - a local Ollama server (`/api/chat`)

pub mod auth;
pub mod message;
pub mod ollama;
pub mod vertex;

use async_trait::async_trait;
use thiserror::Error;

pub use auth::{AccessTokenSource, AuthError};
pub use message::{GenerationParams, Message, Role, DEFAULT_SYSTEM_INSTRUCTION};
pub use ollama::OllamaClient;
pub use vertex::VertexClient;

/// Error type for model calls
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Empty response from model{}", finish_reason_suffix(.0))]
    EmptyResponse(Option<String>),
}

fn finish_reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(" (finish reason: {})", r),
        None => String::new(),
    }
}

/// A model that continues a conversation
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Human-readable model identity, for logs and the banner
    fn name(&self) -> &str;

    /// Return the next assistant message for `history`
    ///
    /// `history` ends with the message being answered.
    async fn complete(&self, history: &[Message]) -> Result<String, ChatError>;
}
