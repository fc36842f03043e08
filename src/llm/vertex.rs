//! Gemini on Vertex AI
//!
//! Calls the non-streaming `generateContent` endpoint:
//!
//! ```text
//! POST https://{location}-aiplatform.googleapis.com/v1/projects/{project}/
//!      locations/{location}/publishers/google/models/{model}:generateContent
//! ```
//!
//! Gemini only knows `user` and `model` turns, so execution results are sent
//! as user turns and adjacent turns with the same role are merged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AccessTokenSource, ChatError, ChatModel, GenerationParams, Message, Role};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl From<GenerationParams> for GenerationConfig {
    fn from(p: GenerationParams) -> Self {
        Self {
            temperature: p.temperature,
            top_p: p.top_p,
            top_k: p.top_k,
            max_output_tokens: p.max_output_tokens,
        }
    }
}

/// Body of a `generateContent` request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

/// Body of a `generateContent` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Map history onto Gemini turns
pub fn build_contents(history: &[Message]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::new();

    for message in history {
        let role = match message.role {
            Role::Assistant => "model",
            Role::User | Role::ToolResult => "user",
        };
        let part = Part {
            text: message.text.clone(),
        };

        match contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => last.parts.push(part),
            _ => contents.push(Content {
                role: Some(role.to_string()),
                parts: vec![part],
            }),
        }
    }

    contents
}

/// Concatenate the text parts of the first candidate
pub fn response_text(response: &GenerateContentResponse) -> Result<String, ChatError> {
    let candidate = response
        .candidates
        .first()
        .ok_or(ChatError::EmptyResponse(None))?;

    let text: String = candidate
        .content
        .as_ref()
        .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ChatError::EmptyResponse(candidate.finish_reason.clone()));
    }
    Ok(text)
}

/// Client for Gemini models hosted on Vertex AI
pub struct VertexClient {
    client: reqwest::Client,
    tokens: AccessTokenSource,
    endpoint: String,
    model: String,
    system_instruction: String,
    params: GenerationParams,
}

impl VertexClient {
    pub fn new(
        project: &str,
        location: &str,
        model: impl Into<String>,
        tokens: AccessTokenSource,
    ) -> Self {
        let model = model.into();
        let host = if location == "global" {
            "aiplatform.googleapis.com".to_string()
        } else {
            format!("{}-aiplatform.googleapis.com", location)
        };
        let endpoint = format!(
            "https://{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            host, project, location, model
        );

        Self {
            client: reqwest::Client::new(),
            tokens,
            endpoint,
            model,
            system_instruction: super::DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch a token up front so auth problems surface at startup
    pub async fn verify_credentials(&self) -> Result<(), ChatError> {
        self.tokens.token().await?;
        Ok(())
    }

    fn request_body(&self, history: &[Message]) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: build_contents(history),
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part {
                    text: self.system_instruction.clone(),
                }],
            }),
            generation_config: self.params.into(),
        }
    }

    async fn send(&self, body: &GenerateContentRequest) -> Result<reqwest::Response, ChatError> {
        let token = self.tokens.token().await?;
        Ok(self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?)
    }
}

#[async_trait]
impl ChatModel for VertexClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, history: &[Message]) -> Result<String, ChatError> {
        let body = self.request_body(history);
        debug!(model = %self.model, turns = body.contents.len(), "Sending generateContent request");

        let mut response = self.send(&body).await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED && self.tokens.invalidate().await {
            warn!("Access token rejected, refreshing");
            response = self.send(&body).await?;
        }

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(ChatError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)?;
        response_text(&parsed)
    }
}
