//! E2B code interpreter backend
//!
//! Control plane (`api.e2b.dev`):
//! - `POST /sandboxes` creates a sandbox from a template
//! - `DELETE /sandboxes/{id}` kills it
//!
//! Each sandbox runs a Jupyter kernel behind
//! `https://49999-{sandboxID}.{domain}/execute`, which answers with one JSON
//! event per line (`stdout`, `stderr`, `result`, `error`, ...). The kernel
//! keeps state between requests, so variables survive across blocks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ExecutionResult, SandboxBackend, SandboxError};
use crate::config::E2bSettings;

/// Port the code interpreter listens on inside the sandbox
const INTERPRETER_PORT: u16 = 49999;

lazy_static! {
    static ref ANSI_ESCAPE: Regex =
        Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("ANSI escape pattern is valid");
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxRequest<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxResponse {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(default)]
    envd_access_token: Option<String>,
    #[serde(default)]
    domain: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
    language: &'a str,
}

/// One line of the `/execute` response stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Stdout {
        text: String,
    },
    Stderr {
        text: String,
    },
    Result {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        is_main_result: bool,
    },
    Error {
        name: String,
        value: String,
        #[serde(default)]
        traceback: String,
    },
    NumberOfExecutions {
        execution_count: u64,
    },
    #[serde(other)]
    Other,
}

/// Fold an event stream into an [`ExecutionResult`]
pub fn fold_events(events: impl IntoIterator<Item = ExecutionEvent>) -> ExecutionResult {
    let mut result = ExecutionResult {
        success: true,
        ..Default::default()
    };

    for event in events {
        match event {
            ExecutionEvent::Stdout { text } => result.stdout.push_str(&text),
            ExecutionEvent::Stderr { text } => result.stderr.push_str(&text),
            ExecutionEvent::Result {
                text: Some(text),
                is_main_result: true,
            } => {
                if !result.stdout.is_empty() && !result.stdout.ends_with('\n') {
                    result.stdout.push('\n');
                }
                result.stdout.push_str(&text);
                result.stdout.push('\n');
            }
            ExecutionEvent::Error {
                name,
                value,
                traceback,
            } => {
                let mut error = format!("{}: {}", name, value);
                let traceback = ANSI_ESCAPE.replace_all(&traceback, "");
                if !traceback.trim().is_empty() {
                    error.push('\n');
                    error.push_str(traceback.trim_end());
                }
                result.error = Some(error);
                result.success = false;
            }
            ExecutionEvent::Result { .. }
            | ExecutionEvent::NumberOfExecutions { .. }
            | ExecutionEvent::Other => {}
        }
    }

    result
}

/// Parse one response line; blank lines yield nothing
pub fn parse_event(line: &str) -> Result<Option<ExecutionEvent>, SandboxError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| SandboxError::Protocol(format!("bad execution event '{}': {}", line, e)))
}

/// An open E2B sandbox
#[derive(Debug, Clone)]
struct RemoteSandbox {
    id: String,
    access_token: Option<String>,
    execute_url: String,
}

/// Runs code in an E2B sandbox
pub struct E2bSandbox {
    settings: E2bSettings,
    client: reqwest::Client,
    sandbox: Option<RemoteSandbox>,
}

impl E2bSandbox {
    pub fn new(settings: E2bSettings, execution_timeout: Duration) -> Result<Self, SandboxError> {
        let client = reqwest::Client::builder()
            .timeout(execution_timeout)
            .build()?;
        Ok(Self {
            settings,
            client,
            sandbox: None,
        })
    }

    async fn error_for(response: reqwest::Response) -> SandboxError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        SandboxError::Status { status, message }
    }
}

#[async_trait]
impl SandboxBackend for E2bSandbox {
    fn name(&self) -> &'static str {
        "e2b"
    }

    async fn open(&mut self) -> Result<(), SandboxError> {
        let url = format!("{}/sandboxes", self.settings.api_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.settings.api_key)
            .json(&CreateSandboxRequest {
                template_id: &self.settings.template,
                timeout: self.settings.timeout_secs,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let created: CreateSandboxResponse = response.json().await?;
        let domain = created
            .domain
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| self.settings.domain.clone());
        let execute_url = format!(
            "https://{}-{}.{}/execute",
            INTERPRETER_PORT, created.sandbox_id, domain
        );

        info!(sandbox_id = %created.sandbox_id, template = %self.settings.template, "E2B sandbox created");
        self.sandbox = Some(RemoteSandbox {
            id: created.sandbox_id,
            access_token: created.envd_access_token,
            execute_url,
        });
        Ok(())
    }

    async fn run(&mut self, code: &str) -> Result<ExecutionResult, SandboxError> {
        let sandbox = self.sandbox.as_ref().ok_or(SandboxError::NotOpen)?;
        let start = Instant::now();

        let mut request = self.client.post(&sandbox.execute_url).json(&ExecuteRequest {
            code,
            language: "python",
        });
        if let Some(token) = &sandbox.access_token {
            request = request.header("X-Access-Token", token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        // Events are newline-delimited and may be split across chunks
        let mut events = Vec::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            pending.extend_from_slice(&chunk?);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if let Some(event) = parse_event(&String::from_utf8_lossy(&line))? {
                    debug!(?event, "Execution event");
                    events.push(event);
                }
            }
        }
        if let Some(event) = parse_event(&String::from_utf8_lossy(&pending))? {
            events.push(event);
        }

        let mut result = fold_events(events);
        result.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok(result)
    }

    async fn close(&mut self) -> Result<(), SandboxError> {
        let Some(sandbox) = self.sandbox.take() else {
            return Ok(());
        };

        let url = format!(
            "{}/sandboxes/{}",
            self.settings.api_url.trim_end_matches('/'),
            sandbox.id
        );
        let response = self
            .client
            .delete(&url)
            .header("X-API-Key", &self.settings.api_key)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {
                info!(sandbox_id = %sandbox.id, "E2B sandbox killed");
                Ok(())
            }
            reqwest::StatusCode::NOT_FOUND => {
                warn!(sandbox_id = %sandbox.id, "E2B sandbox already gone");
                Ok(())
            }
            _ => Err(Self::error_for(response).await),
        }
    }
}
