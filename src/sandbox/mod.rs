//! Remote code execution
//!
//! A [`SandboxBackend`] speaks to one remote execution service.
//! [`SandboxSession`] wraps a backend with the lifecycle the conversation
//! needs: opened lazily on the first block, reused for every later block
//! so interpreter state carries over, and closed once at shutdown.
//!
//! # Architecture
//!
//! ```text
//! Conversation → SandboxSession.execute(code)
//!                     ↓ (first call only)
//!               backend.open()  → remote session
//!                     ↓
//!               backend.run(code) → stdout / stderr / error
//!                     ↓
//!               ExecutionResult (failures included, never a panic)
//! ```

pub mod e2b;
pub mod session;
pub mod vm;

use async_trait::async_trait;
use thiserror::Error;

pub use e2b::E2bSandbox;
pub use session::{SandboxSession, SessionState};
pub use vm::VmSandbox;

/// Outcome of running one code block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    /// Combined standard output, including the value of a trailing expression
    pub stdout: String,
    /// Standard error (warnings and the like)
    pub stderr: String,
    /// Raised error or transport failure, if any
    pub error: Option<String>,
    pub success: bool,
    /// Wall time of the remote call in milliseconds
    pub duration_ms: f64,
}

impl ExecutionResult {
    /// A failed result carrying only an error description
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            success: false,
            ..Default::default()
        }
    }

    /// Text relayed to the model as a tool-result message
    pub fn to_feedback(&self, block: usize, total: usize) -> String {
        let mut text = format!(
            "Execution result of code block {}/{} ({}):\n",
            block,
            total,
            if self.success { "success" } else { "failed" }
        );
        if !self.stdout.is_empty() {
            text.push_str("Stdout:\n");
            text.push_str(self.stdout.trim_end());
            text.push('\n');
        }
        if !self.stderr.is_empty() {
            text.push_str("Stderr:\n");
            text.push_str(self.stderr.trim_end());
            text.push('\n');
        }
        if let Some(error) = &self.error {
            text.push_str("Error:\n");
            text.push_str(error.trim_end());
            text.push('\n');
        }
        if self.success && self.stdout.is_empty() && self.stderr.is_empty() {
            text.push_str("(no output)\n");
        }
        text
    }
}

/// Error type for sandbox operations
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Sandbox session is not open")]
    NotOpen,

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection failed: {0}")]
    Connection(String),
}

/// One remote execution service
#[async_trait]
pub trait SandboxBackend: Send {
    /// Short backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Create the remote session
    async fn open(&mut self) -> Result<(), SandboxError>;

    /// Run `code` in the open session
    ///
    /// Errors raised by the code itself are reported in the returned
    /// result; `Err` means the service could not be reached or answered
    /// with something unusable.
    async fn run(&mut self, code: &str) -> Result<ExecutionResult, SandboxError>;

    /// Tear the remote session down
    async fn close(&mut self) -> Result<(), SandboxError>;
}
