//! codeloop - chat with a hosted model that runs the code it writes
//!
//! User prompts go to a hosted language model. Python blocks in the reply
//! are executed in a remote sandbox session that lives for the whole run,
//! and their output (errors included) is fed back into the conversation.
//!
//! # Modules
//!
//! - `agent` - conversation loop, history and console rendering
//! - `config` - environment configuration and interactive prompting
//! - `extract` - fenced code block extraction
//! - `llm` - model clients (Vertex AI Gemini, Ollama)
//! - `sandbox` - remote execution backends (E2B, gcloud SSH VM) and session lifecycle
//! - `metrics` - Prometheus metrics
//! - `tracing` - logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use codeloop::{Config, Conversation, ConversationConfig, SandboxSession};
//!
//! let config = Config::from_env()?;
//! let mut conversation = Conversation::new(model, SandboxSession::new(backend), ConversationConfig::default());
//! conversation.run(stdin, &mut stdout).await?;
//! conversation.shutdown().await;
//! ```

pub mod agent;
pub mod config;
pub mod extract;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{Conversation, ConversationConfig, LoopState, TurnOutcome};
pub use config::{Config, ConfigError, PromptProvider};
pub use extract::{extract_code_blocks, CodeBlock};
pub use llm::{ChatModel, Message, Role};
pub use sandbox::{ExecutionResult, SandboxBackend, SandboxSession};
